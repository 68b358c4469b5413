//! Status command implementation
//!
//! This module implements the `status` command for displaying the load
//! watermark, recent runs and warehouse table counts.

use super::{EXIT_CONFIG, EXIT_CONNECTION, EXIT_FATAL, EXIT_SUCCESS};
use crate::adapters::database::create_store_and_state;
use crate::config::load_config;
use crate::core::state::{StateManager, Watermark};
use crate::domain::{RunAuditRecord, TableCount};
use clap::Args;
use std::path::Path;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Filter by pipeline name
    #[arg(long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(long, default_value_t = 10)]
    pub runs: usize,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &Path) -> anyhow::Result<i32> {
        tracing::info!("Checking warehouse status");

        println!("📊 Warehouse Status");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let (store, state_storage) = match create_store_and_state(&config).await {
            Ok(pair) => pair,
            Err(e) => {
                println!("❌ Failed to connect to warehouse");
                println!("   Error: {e}");
                return Ok(EXIT_CONNECTION);
            }
        };

        let state_manager = StateManager::new_with_storage(state_storage);
        let watermarks = match state_manager.get_all_watermarks().await {
            Ok(w) => w,
            Err(e) => {
                println!("❌ Failed to load watermarks");
                println!("   Error: {e}");
                return Ok(EXIT_FATAL);
            }
        };

        let (runs, counts) = {
            let mut tx = match store.begin().await {
                Ok(tx) => tx,
                Err(e) => {
                    println!("❌ Failed to connect to warehouse");
                    println!("   Error: {e}");
                    return Ok(EXIT_CONNECTION);
                }
            };
            let runs = tx.recent_runs(self.runs).await;
            let counts = tx.table_counts().await;
            tx.rollback().await?;
            (runs?, counts?)
        };

        let watermarks: Vec<&Watermark> = watermarks
            .iter()
            .filter(|w| self.pipeline.as_deref().map_or(true, |p| w.pipeline_name == p))
            .collect();
        print_watermarks(&watermarks);

        let runs: Vec<&RunAuditRecord> = runs
            .iter()
            .filter(|r| self.pipeline.as_deref().map_or(true, |p| r.pipeline_name == p))
            .collect();
        print_runs(&runs);
        print_counts(&counts);

        Ok(EXIT_SUCCESS)
    }
}

fn print_watermarks(watermarks: &[&Watermark]) {
    if watermarks.is_empty() {
        println!("No load history found.");
        println!("Run 'imaging-warehouse run --input <records.jsonl>' to start loading.");
        println!();
        return;
    }

    println!(
        "{:<30} {:<15} {:>12} {:>12} {:>8} {:<25}",
        "Pipeline", "Status", "Loaded", "Failed", "Pending", "Checkpoint"
    );
    println!("{}", "-".repeat(106));

    for watermark in watermarks {
        let status = if watermark.is_completed() {
            "✅ Completed"
        } else if watermark.is_in_progress() {
            "🔄 In Progress"
        } else if watermark.is_failed() {
            "❌ Failed"
        } else {
            "⏸️  Not Started"
        };

        let checkpoint = watermark
            .last_checkpoint
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Never".to_string());

        println!(
            "{:<30} {:<15} {:>12} {:>12} {:>8} {:<25}",
            watermark.pipeline_name,
            status,
            watermark.total_rows_loaded,
            watermark.total_rows_failed,
            watermark.pending_procedures.len(),
            checkpoint
        );
    }
    println!();
}

fn print_runs(runs: &[&RunAuditRecord]) {
    if runs.is_empty() {
        return;
    }

    println!("Recent runs:");
    println!(
        "{:<38} {:<12} {:<9} {:>10} {:>10} {:>10}  {:<20}",
        "Run ID", "Mode", "Status", "Loaded", "Failed", "Duration", "Started"
    );
    println!("{}", "-".repeat(116));
    for run in runs {
        println!(
            "{:<38} {:<12} {:<9} {:>10} {:>10} {:>9}s  {:<20}",
            run.run_id.to_string(),
            run.mode.as_str(),
            run.status.to_string(),
            run.rows_loaded,
            run.rows_failed,
            run.duration_ms / 1000,
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string()
        );
        if let Some(message) = &run.error_message {
            println!("    {message}");
        }
    }
    println!();
}

fn print_counts(counts: &[TableCount]) {
    println!("Table counts:");
    for count in counts {
        println!("  {:<40} {:>12}", count.table_name, count.rows);
    }
    println!();
}
