//! Logging and observability
//!
//! Structured logging through `tracing`:
//! - console output for operators
//! - optional JSON log files with rotation
//! - `RUST_LOG` overrides the configured level
//!
//! # Example
//!
//! ```no_run
//! use imaging_warehouse::logging::init_logging;
//! use imaging_warehouse::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of an engine run
///
/// # Example
///
/// ```no_run
/// use imaging_warehouse::log_run_start;
///
/// let run_id = uuid::Uuid::new_v4();
/// log_run_start!(run_id, "imaging_warehouse_load", "incremental", 2000);
/// ```
#[macro_export]
macro_rules! log_run_start {
    ($run_id:expr, $pipeline:expr, $mode:expr, $records:expr) => {
        tracing::info!(
            run_id = %$run_id,
            pipeline = %$pipeline,
            mode = %$mode,
            records = $records,
            "Starting warehouse load"
        );
    };
}

/// Log how a chunk ended
///
/// # Example
///
/// ```no_run
/// use imaging_warehouse::log_chunk_outcome;
///
/// log_chunk_outcome!(3, "committed", 498, 2);
/// ```
#[macro_export]
macro_rules! log_chunk_outcome {
    ($index:expr, $outcome:expr, $loaded:expr, $failed:expr) => {
        tracing::info!(
            chunk = $index,
            outcome = $outcome,
            loaded = $loaded,
            failed = $failed,
            "Chunk finished"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use imaging_warehouse::log_error_with_context;
/// use imaging_warehouse::domain::WarehouseError;
///
/// let error = WarehouseError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}
