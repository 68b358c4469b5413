//! Run command implementation
//!
//! This module implements the `run` command, which loads a JSON Lines batch
//! of encounter records into the warehouse.

use super::{
    EXIT_CONFIG, EXIT_CONNECTION, EXIT_FATAL, EXIT_INPUT, EXIT_INTERRUPTED, EXIT_PARTIAL,
    EXIT_SUCCESS,
};
use crate::adapters::database::create_store_and_state;
use crate::config::{load_config, WarehouseConfig};
use crate::core::batch::{read_records, BatchController, EngineOptions, RunReport};
use crate::core::state::StateManager;
use crate::domain::{RunMode, RunStatus, WarehouseError};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON Lines file with one encounter record per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Dry run mode - roll back every chunk instead of committing
    #[arg(long)]
    pub dry_run: bool,

    /// Override run mode (incremental or full)
    #[arg(long)]
    pub mode: Option<String>,

    /// Override the number of records per chunk
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Override the number of chunks processed concurrently
    #[arg(long)]
    pub parallel: Option<usize>,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error for an unknown mode or when the
    /// overridden values no longer validate.
    pub fn apply_overrides(&self, config: &mut WarehouseConfig) -> Result<(), WarehouseError> {
        if let Some(mode) = &self.mode {
            tracing::info!(mode = %mode, "Overriding run mode from CLI");
            config.engine.mode = mode.parse::<RunMode>()?;
        }
        if let Some(batch_size) = self.batch_size {
            tracing::info!(batch_size, "Overriding batch size from CLI");
            config.engine.batch_size = batch_size;
        }
        if let Some(parallel) = self.parallel {
            tracing::info!(parallel, "Overriding chunk parallelism from CLI");
            config.engine.max_parallel_chunks = parallel;
        }
        if self.dry_run {
            tracing::info!("Enabling dry-run mode from CLI");
            config.application.dry_run = true;
        }

        config.validate().map_err(WarehouseError::Configuration)
    }

    /// Execute the run command
    pub async fn execute(
        &self,
        config_path: &Path,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(input = %self.input.display(), "Starting run command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        if let Err(e) = self.apply_overrides(&mut config) {
            tracing::error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration validation failed: {e}");
            return Ok(EXIT_CONFIG);
        }

        let records = match read_records(&self.input) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                eprintln!("Failed to read input: {e}");
                return Ok(EXIT_INPUT);
            }
        };

        if config.application.dry_run {
            tracing::info!("Dry run mode enabled - no data will be committed");
            println!("🔍 DRY RUN MODE - every chunk will be rolled back");
            println!();
        }

        if !self.yes && !config.application.dry_run && !self.confirm(&config, records.len())? {
            println!("Run cancelled.");
            return Ok(EXIT_SUCCESS);
        }

        let (store, state_storage) = match create_store_and_state(&config).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create warehouse store");
                eprintln!("Failed to connect to warehouse: {e}");
                return Ok(EXIT_CONNECTION);
            }
        };

        if let Err(e) = store.test_connection().await {
            tracing::error!(error = %e, backend = store.backend_name(), "Connection test failed");
            eprintln!("Failed to connect to warehouse: {e}");
            return Ok(EXIT_CONNECTION);
        }

        if let Err(e) = store.ensure_schema().await {
            tracing::error!(error = %e, "Failed to prepare warehouse schema");
            eprintln!("Failed to prepare warehouse schema: {e}");
            return Ok(EXIT_CONNECTION);
        }

        let state = Arc::new(StateManager::new_with_storage(state_storage));
        let controller = BatchController::new(store, state, EngineOptions::from_config(&config))
            .with_shutdown(shutdown_signal.clone());

        println!("🚀 Loading {} record(s)...", records.len());
        println!();

        let timeout = Duration::from_secs(config.engine.shutdown_timeout_secs);
        let run = controller.run(records, config.engine.batch_size);
        let report = tokio::select! {
            result = run => match result {
                Ok(report) => report,
                Err(WarehouseError::Configuration(message)) => {
                    eprintln!("Configuration error: {message}");
                    return Ok(EXIT_CONFIG);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Run failed");
                    eprintln!("Run failed: {e}");
                    return Ok(EXIT_FATAL);
                }
            },
            _ = shutdown_deadline(shutdown_signal, timeout) => {
                tracing::warn!(
                    timeout_secs = config.engine.shutdown_timeout_secs,
                    "In-flight chunks did not finish before the shutdown timeout"
                );
                eprintln!("Shutdown timeout reached; uncommitted chunks were abandoned.");
                return Ok(EXIT_INTERRUPTED);
            }
        };

        println!("{}", report.format_summary());

        let code = exit_code(&report, config.engine.min_success_rate);
        match code {
            EXIT_INTERRUPTED => {
                println!("⚠️  Run interrupted. Committed chunks are kept.");
                println!("   Re-run the same input; loaded encounters are skipped.");
            }
            EXIT_SUCCESS if report.status == RunStatus::Success => {
                println!("✅ Run completed successfully!");
            }
            EXIT_SUCCESS => println!("✅ Run completed within the accepted failure rate."),
            EXIT_PARTIAL => println!("⚠️  Run completed with failures"),
            _ => println!("❌ Run failed"),
        }

        Ok(code)
    }

    fn confirm(&self, config: &WarehouseConfig, records: usize) -> anyhow::Result<bool> {
        use std::io::{self, Write};

        println!("Run Configuration:");
        println!("  Input: {} ({records} record(s))", self.input.display());
        println!("  Pipeline: {}", config.engine.pipeline_name);
        println!("  Mode: {}", config.engine.mode);
        println!("  Target: {:?}", config.database_target);
        println!("  Batch size: {}", config.engine.batch_size);
        println!("  Parallel chunks: {}", config.engine.max_parallel_chunks);
        println!();
        print!("Proceed with load? [y/N]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().eq_ignore_ascii_case("y"))
    }
}

/// Map a finished run to the process exit code
pub fn exit_code(report: &RunReport, min_success_rate: f64) -> i32 {
    if report.interrupted {
        return EXIT_INTERRUPTED;
    }
    match report.status {
        RunStatus::Success => EXIT_SUCCESS,
        RunStatus::Partial if report.success_rate() >= min_success_rate => EXIT_SUCCESS,
        RunStatus::Partial => EXIT_PARTIAL,
        RunStatus::Failed => EXIT_FATAL,
    }
}

/// Resolves `timeout` after a shutdown request; never resolves otherwise
async fn shutdown_deadline(mut shutdown: watch::Receiver<bool>, timeout: Duration) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
    tokio::time::sleep(timeout).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use test_case::test_case;
    use uuid::Uuid;

    const MEMORY_CONFIG: &str = "database_target = \"memory\"\n\n[application]\n";

    fn args() -> RunArgs {
        RunArgs {
            input: PathBuf::from("records.jsonl"),
            yes: true,
            dry_run: false,
            mode: None,
            batch_size: None,
            parallel: None,
        }
    }

    fn memory_config() -> WarehouseConfig {
        parse_config(MEMORY_CONFIG).unwrap()
    }

    fn report(status: RunStatus, loaded: usize, failed: usize) -> RunReport {
        let mut report = RunReport::new(Uuid::new_v4(), "nightly", RunMode::Incremental, false);
        report.status = status;
        report.rows_loaded = loaded;
        report.rows_failed = failed;
        report
    }

    #[test_case(RunStatus::Success, 100, 0, EXIT_SUCCESS ; "success")]
    #[test_case(RunStatus::Partial, 98, 2, EXIT_SUCCESS ; "partial above threshold")]
    #[test_case(RunStatus::Partial, 75, 25, EXIT_PARTIAL ; "partial below threshold")]
    #[test_case(RunStatus::Failed, 0, 100, EXIT_FATAL ; "failed")]
    fn test_exit_code(status: RunStatus, loaded: usize, failed: usize, expected: i32) {
        assert_eq!(exit_code(&report(status, loaded, failed), 95.0), expected);
    }

    #[test]
    fn test_exit_code_interrupted() {
        let mut report = report(RunStatus::Partial, 10, 0);
        report.rows_cancelled = 10;
        report.interrupted = true;
        assert_eq!(exit_code(&report, 95.0), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = memory_config();
        let args = RunArgs {
            dry_run: true,
            mode: Some("full".to_string()),
            batch_size: Some(250),
            parallel: Some(2),
            ..args()
        };

        args.apply_overrides(&mut config).unwrap();
        assert!(config.application.dry_run);
        assert_eq!(config.engine.mode, RunMode::Full);
        assert_eq!(config.engine.batch_size, 250);
        assert_eq!(config.engine.max_parallel_chunks, 2);
    }

    #[test]
    fn test_apply_overrides_rejects_bad_mode() {
        let mut config = memory_config();
        let args = RunArgs {
            mode: Some("sideways".to_string()),
            ..args()
        };
        let err = args.apply_overrides(&mut config).unwrap_err();
        assert!(matches!(err, WarehouseError::Configuration(_)));
    }

    #[test]
    fn test_apply_overrides_revalidates_bounds() {
        let mut config = memory_config();
        let args = RunArgs {
            batch_size: Some(0),
            ..args()
        };
        assert!(args.apply_overrides(&mut config).is_err());
    }

    #[tokio::test]
    async fn test_missing_config_is_config_error() {
        let (_tx, rx) = watch::channel(false);
        let code = args()
            .execute(Path::new("/nonexistent/warehouse.toml"), rx)
            .await
            .unwrap();
        assert_eq!(code, EXIT_CONFIG);
    }

    #[tokio::test]
    async fn test_missing_input_is_input_error() {
        use std::io::Write;

        let mut config = tempfile::NamedTempFile::new().unwrap();
        write!(config, "{MEMORY_CONFIG}").unwrap();
        config.flush().unwrap();

        let (_tx, rx) = watch::channel(false);
        let args = RunArgs {
            input: PathBuf::from("/nonexistent/records.jsonl"),
            ..args()
        };
        let code = args.execute(config.path(), rx).await.unwrap();
        assert_eq!(code, EXIT_INPUT);
    }
}
