//! CLI interface and argument parsing
//!
//! This module provides the `imaging-warehouse` command line using clap.

pub mod commands;

use crate::config::resolve_config_path;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Imaging Warehouse - radiology data warehouse loader
#[derive(Parser, Debug)]
#[command(name = "imaging-warehouse")]
#[command(version, about, long_about = None)]
#[command(author = "Imaging Warehouse Contributors")]
pub struct Cli {
    /// Path to configuration file (default: warehouse.toml)
    #[arg(short, long, env = "WAREHOUSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "WAREHOUSE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Configuration file this invocation should read
    pub fn config_path(&self) -> PathBuf {
        resolve_config_path(self.config.as_deref())
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a batch of encounter records into the warehouse
    Run(commands::run::RunArgs),

    /// Run the integrity scan over the warehouse
    Check(commands::check::CheckArgs),

    /// Show the load watermark, recent runs and table counts
    Status(commands::status::StatusArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["imaging-warehouse", "run", "--input", "records.jsonl"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input, PathBuf::from("records.jsonl"));
                assert!(!args.yes);
                assert!(args.batch_size.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_run_overrides() {
        let cli = Cli::parse_from([
            "imaging-warehouse",
            "run",
            "--input",
            "r.jsonl",
            "--yes",
            "--dry-run",
            "--mode",
            "full",
            "--batch-size",
            "250",
            "--parallel",
            "2",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.yes);
        assert!(args.dry_run);
        assert_eq!(args.mode.as_deref(), Some("full"));
        assert_eq!(args.batch_size, Some(250));
        assert_eq!(args.parallel, Some(2));
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::parse_from(["imaging-warehouse", "--config", "custom.toml", "check"]);
        assert_eq!(cli.config_path(), Path::new("custom.toml"));
        assert!(matches!(cli.command, Commands::Check(_)));
    }

    #[test]
    fn test_cli_parse_with_log_level() {
        let cli = Cli::parse_from(["imaging-warehouse", "--log-level", "debug", "status"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert!(matches!(cli.command, Commands::Status(_)));
    }

    #[test]
    fn test_cli_parse_validate_config() {
        let cli = Cli::parse_from(["imaging-warehouse", "validate-config"]);
        assert!(matches!(cli.command, Commands::ValidateConfig(_)));
    }

    #[test]
    fn test_cli_parse_init() {
        let cli = Cli::parse_from(["imaging-warehouse", "init", "--force"]);
        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert!(args.force);
        assert_eq!(args.output, PathBuf::from("warehouse.toml"));
    }

    #[test]
    fn test_run_requires_input() {
        assert!(Cli::try_parse_from(["imaging-warehouse", "run"]).is_err());
    }
}
