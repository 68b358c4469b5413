//! Configuration management for the imaging warehouse loader.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! Configuration files support:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `WAREHOUSE_<SECTION>_<KEY>` overrides applied after parsing
//! - Default values for optional settings
//! - Per-section validation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use imaging_warehouse::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("warehouse.toml")?;
//!
//! println!("Pipeline: {}", config.engine.pipeline_name);
//! println!("Batch size: {}", config.engine.batch_size);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Application settings (name, log level, dry run)
//! - [`EngineConfig`] - Batch engine (mode, chunk size, parallelism, success threshold)
//! - [`PostgreSQLConfig`] - Connection pool and TLS settings
//! - [`ValidationConfig`] - Post-run integrity scan
//! - [`LoggingConfig`] - Logging configuration
//!
//! # Example Configuration
//!
//! ```toml
//! environment = "production"
//! database_target = "postgresql"
//!
//! [application]
//! name = "imaging-warehouse"
//! log_level = "info"
//!
//! [engine]
//! mode = "incremental"
//! batch_size = 500
//! max_parallel_chunks = 4
//!
//! [postgresql]
//! connection_string = "postgresql://loader:${WAREHOUSE_DB_PASSWORD}@db:5432/imaging"
//! ssl_mode = "require"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config, resolve_config_path};
pub use schema::{
    ApplicationConfig, DatabaseTarget, EngineConfig, Environment, LoggingConfig,
    PostgreSQLConfig, ValidationConfig, WarehouseConfig,
};
pub use secret::{secret_string, SecretString, SecretValue};
