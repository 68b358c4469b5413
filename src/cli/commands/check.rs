//! Check command implementation
//!
//! Runs the post-load integrity scan on its own, without loading anything.

use super::{EXIT_CONFIG, EXIT_CONNECTION, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS};
use crate::adapters::database::create_store_and_state;
use crate::config::load_config;
use crate::core::validation::IntegrityValidator;
use clap::Args;
use std::path::Path;

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    /// Execute the check command
    pub async fn execute(&self, config_path: &Path) -> anyhow::Result<i32> {
        tracing::info!("Running integrity scan");

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let (store, _) = match create_store_and_state(&config).await {
            Ok(pair) => pair,
            Err(e) => {
                println!("❌ Failed to connect to warehouse");
                println!("   Error: {e}");
                return Ok(EXIT_CONNECTION);
            }
        };

        let report = match IntegrityValidator::new(store).validate().await {
            Ok(r) => r,
            Err(e) if e.is_systemic() => {
                println!("❌ Failed to connect to warehouse");
                println!("   Error: {e}");
                return Ok(EXIT_CONNECTION);
            }
            Err(e) => {
                println!("❌ Integrity scan failed");
                println!("   Error: {e}");
                return Ok(EXIT_FATAL);
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{}", report.format_summary());
        }

        if report.is_success() {
            Ok(EXIT_SUCCESS)
        } else {
            tracing::warn!(
                violations = report.total_violations(),
                "Integrity scan found violations"
            );
            Ok(EXIT_PARTIAL)
        }
    }
}
