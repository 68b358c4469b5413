// Imaging Warehouse - Radiology Data Warehouse Loader
// Copyright (c) 2025 Imaging Warehouse Contributors
// Licensed under the MIT License

use clap::Parser;
use imaging_warehouse::cli::commands::EXIT_FATAL;
use imaging_warehouse::cli::{Cli, Commands};
use imaging_warehouse::config::{load_config, LoggingConfig};
use imaging_warehouse::logging::init_logging;
use std::path::Path;
use std::process;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // A missing .env file is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config_path = cli.config_path();

    // Logging settings come from the config file when it loads; the command
    // itself reports configuration errors with the proper exit code.
    let (config_level, logging_config) = logging_settings(&cli, &config_path);
    let log_level = cli
        .log_level
        .clone()
        .or(config_level)
        .unwrap_or_else(|| "info".to_string());

    let logging_guard = match init_logging(&log_level, &logging_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(EXIT_FATAL);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Imaging Warehouse - Radiology Data Warehouse Loader"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown(shutdown_tx));

    let exit_code = match execute_command(&cli, &config_path, shutdown_rx).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            eprintln!("Error: {e}");
            EXIT_FATAL
        }
    };

    drop(logging_guard);
    process::exit(exit_code);
}

fn logging_settings(cli: &Cli, config_path: &Path) -> (Option<String>, LoggingConfig) {
    let console_only = LoggingConfig {
        local_enabled: false,
        ..LoggingConfig::default()
    };

    if matches!(cli.command, Commands::Init(_)) {
        return (None, console_only);
    }

    match load_config(config_path) {
        Ok(config) => (Some(config.application.log_level), config.logging),
        Err(_) => (None, console_only),
    }
}

/// Flip the shutdown flag on SIGINT or SIGTERM
async fn wait_for_shutdown(shutdown_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler; only Ctrl+C is handled");
                None
            }
        };

        let terminated = async {
            match sigterm.as_mut() {
                Some(s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminated => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
    }

    println!("\n⚠️  Shutdown signal received, finishing in-flight chunks...");
    let _ = shutdown_tx.send(true);
}

/// Execute the CLI command
async fn execute_command(
    cli: &Cli,
    config_path: &Path,
    shutdown_signal: watch::Receiver<bool>,
) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Run(args) => args.execute(config_path, shutdown_signal).await,
        Commands::Check(args) => args.execute(config_path).await,
        Commands::Status(args) => args.execute(config_path).await,
        Commands::ValidateConfig(args) => args.execute(config_path).await,
        Commands::Init(args) => args.execute().await,
    }
}
