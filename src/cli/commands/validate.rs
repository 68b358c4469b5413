//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the warehouse configuration file.

use super::{EXIT_CONFIG, EXIT_SUCCESS};
use crate::config::load_config;
use crate::config::schema::DatabaseTarget;
use clap::Args;
use secrecy::ExposeSecret;
use std::path::Path;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &Path) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path.display(), "Validating configuration");

        println!("🔍 Validating configuration file: {}", config_path.display());
        println!();

        // load_config validates after parsing and applying overrides
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                println!();
                return Ok(EXIT_CONFIG);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Application: {}", config.application.name);
        println!("  Environment: {:?}", config.environment);
        println!("  Log Level: {}", config.application.log_level);
        println!("  Dry Run: {}", config.application.dry_run);

        match config.database_target {
            DatabaseTarget::Memory => println!("  Database Target: in-memory"),
            DatabaseTarget::PostgreSQL => {
                if let Some(ref pg_config) = config.postgresql {
                    println!("  Database Target: PostgreSQL");
                    println!(
                        "  PostgreSQL Connection: {}",
                        redact_dsn(pg_config.connection_string.expose_secret().as_str())
                    );
                    println!("  Max Connections: {}", pg_config.max_connections);
                    println!("  SSL Mode: {}", pg_config.ssl_mode);
                }
            }
        }

        println!("  Pipeline: {}", config.engine.pipeline_name);
        println!("  Run Mode: {}", config.engine.mode);
        println!("  Batch Size: {}", config.engine.batch_size);
        println!("  Parallel Chunks: {}", config.engine.max_parallel_chunks);
        println!("  Min Success Rate: {:.1}%", config.engine.min_success_rate);
        println!("  Validation: {}", config.validation.enabled);
        println!();
        Ok(EXIT_SUCCESS)
    }
}

/// Host part of a connection string, without credentials
fn redact_dsn(dsn: &str) -> &str {
    dsn.split('@').next_back().unwrap_or("***")
}
