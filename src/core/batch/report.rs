//! Run report
//!
//! The [`RunReport`] is the only externally observable outcome of a run.

use crate::core::validation::ValidationReport;
use crate::domain::{RunMode, RunStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// How one chunk ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResult {
    Committed,
    /// Dry run: everything succeeded but the unit of work was rolled back
    RolledBackDryRun,
    /// An error rolled the chunk back; every row is failed
    Failed { error: String, systemic: bool },
    /// Not started because of a shutdown request or an earlier systemic error
    Cancelled { by_shutdown: bool },
}

/// Counters of one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub index: usize,
    pub rows_loaded: usize,
    pub rows_failed: usize,
    pub rows_cancelled: usize,
    pub duplicates_skipped: usize,
    pub result: ChunkResult,
}

impl ChunkOutcome {
    pub fn cancelled(index: usize, rows: usize, by_shutdown: bool) -> Self {
        Self {
            index,
            rows_loaded: 0,
            rows_failed: 0,
            rows_cancelled: rows,
            duplicates_skipped: 0,
            result: ChunkResult::Cancelled { by_shutdown },
        }
    }

    pub fn failed(index: usize, rows: usize, error: String, systemic: bool) -> Self {
        Self {
            index,
            rows_loaded: 0,
            rows_failed: rows,
            rows_cancelled: 0,
            duplicates_skipped: 0,
            result: ChunkResult::Failed { error, systemic },
        }
    }

    pub fn label(&self) -> &'static str {
        match self.result {
            ChunkResult::Committed => "committed",
            ChunkResult::RolledBackDryRun => "dry_run",
            ChunkResult::Failed { .. } => "rolled_back",
            ChunkResult::Cancelled { .. } => "cancelled",
        }
    }
}

/// Outcome of a run, as handed back to the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub mode: RunMode,

    /// Records written or recognised as already loaded
    pub rows_loaded: usize,
    /// Records that failed, each with a quality-log entry
    pub rows_failed: usize,
    /// Records never attempted because the run stopped early
    pub rows_cancelled: usize,
    /// Records whose encounter code was already registered (part of `rows_loaded`)
    pub duplicates_skipped: usize,

    pub chunks_total: usize,
    pub chunks_failed: usize,

    pub dimension_rows_written: u64,
    pub fact_rows_written: u64,
    /// Procedures whose facts wait for a missing dimension
    pub facts_deferred: usize,

    pub duration: Duration,
    pub status: RunStatus,
    pub error_message: Option<String>,

    /// Post-run scan, when it ran
    pub validation: Option<ValidationReport>,

    /// A shutdown request stopped the run before every chunk started
    pub interrupted: bool,
    pub dry_run: bool,
}

impl RunReport {
    pub fn new(run_id: Uuid, pipeline_name: impl Into<String>, mode: RunMode, dry_run: bool) -> Self {
        Self {
            run_id,
            pipeline_name: pipeline_name.into(),
            mode,
            rows_loaded: 0,
            rows_failed: 0,
            rows_cancelled: 0,
            duplicates_skipped: 0,
            chunks_total: 0,
            chunks_failed: 0,
            dimension_rows_written: 0,
            fact_rows_written: 0,
            facts_deferred: 0,
            duration: Duration::ZERO,
            status: RunStatus::Success,
            error_message: None,
            validation: None,
            interrupted: false,
            dry_run,
        }
    }

    /// Fold one chunk's counters into the report
    pub fn add_chunk(&mut self, outcome: &ChunkOutcome) {
        self.chunks_total += 1;
        self.rows_loaded += outcome.rows_loaded;
        self.rows_failed += outcome.rows_failed;
        self.rows_cancelled += outcome.rows_cancelled;
        self.duplicates_skipped += outcome.duplicates_skipped;
        match outcome.result {
            ChunkResult::Failed { .. } => self.chunks_failed += 1,
            ChunkResult::Cancelled { by_shutdown: true } => self.interrupted = true,
            _ => {}
        }
    }

    /// Total records handed to the run
    pub fn total_rows(&self) -> usize {
        self.rows_loaded + self.rows_failed + self.rows_cancelled
    }

    /// Loaded rows as a percentage of all rows
    pub fn success_rate(&self) -> f64 {
        let total = self.total_rows();
        if total == 0 {
            return 100.0;
        }
        (self.rows_loaded as f64 / total as f64) * 100.0
    }

    pub fn is_successful(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Log the report
    pub fn log_summary(&self) {
        tracing::info!(
            run_id = %self.run_id,
            pipeline = %self.pipeline_name,
            mode = %self.mode,
            status = %self.status,
            rows_loaded = self.rows_loaded,
            rows_failed = self.rows_failed,
            rows_cancelled = self.rows_cancelled,
            duplicates_skipped = self.duplicates_skipped,
            chunks_failed = self.chunks_failed,
            fact_rows_written = self.fact_rows_written,
            facts_deferred = self.facts_deferred,
            duration_ms = self.duration.as_millis() as u64,
            success_rate = format!("{:.2}%", self.success_rate()),
            dry_run = self.dry_run,
            "Run completed"
        );

        if let Some(message) = &self.error_message {
            tracing::warn!(run_id = %self.run_id, message = %message, "Run finished with errors");
        }
    }

    /// Format the report as a human-readable string
    pub fn format_summary(&self) -> String {
        let mut summary = String::new();
        let mark = match self.status {
            RunStatus::Success => "✅",
            RunStatus::Partial => "⚠️",
            RunStatus::Failed => "❌",
        };
        summary.push_str(&format!("{mark} Run {} ({})\n", self.run_id, self.status));
        if self.dry_run {
            summary.push_str("  DRY RUN: no changes were committed\n");
        }
        summary.push_str(&format!(
            "  Pipeline: {} ({} mode)\n",
            self.pipeline_name, self.mode
        ));
        summary.push_str(&format!(
            "  Rows loaded: {} ({} duplicate(s) skipped)\n",
            self.rows_loaded, self.duplicates_skipped
        ));
        summary.push_str(&format!("  Rows failed: {}\n", self.rows_failed));
        if self.rows_cancelled > 0 {
            summary.push_str(&format!("  Rows not processed: {}\n", self.rows_cancelled));
        }
        summary.push_str(&format!(
            "  Chunks: {} ({} rolled back)\n",
            self.chunks_total, self.chunks_failed
        ));
        summary.push_str(&format!(
            "  Dimension rows: {}, fact rows: {}, deferred facts: {}\n",
            self.dimension_rows_written, self.fact_rows_written, self.facts_deferred
        ));
        summary.push_str(&format!("  Success rate: {:.2}%\n", self.success_rate()));
        summary.push_str(&format!("  Duration: {:.2?}\n", self.duration));
        if let Some(message) = &self.error_message {
            summary.push_str(&format!("  Error: {message}\n"));
        }
        if self.interrupted {
            summary.push_str("  Interrupted by shutdown request\n");
        }
        if let Some(validation) = &self.validation {
            summary.push_str(&validation.format_summary());
        }
        summary
    }
}

/// Decide the status of a finished run
///
/// Failed on a systemic error or when nothing loaded but something failed;
/// Success only when nothing failed, nothing was cancelled and validation passed.
pub fn classify_status(
    systemic: bool,
    rows_loaded: usize,
    rows_failed: usize,
    rows_cancelled: usize,
    validation_passed: bool,
) -> RunStatus {
    if systemic || (rows_loaded == 0 && rows_failed > 0) {
        RunStatus::Failed
    } else if rows_failed == 0 && rows_cancelled == 0 && validation_passed {
        RunStatus::Success
    } else {
        RunStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(false, 10, 0, 0, true, RunStatus::Success ; "clean run")]
    #[test_case(false, 0, 0, 0, true, RunStatus::Success ; "empty run")]
    #[test_case(false, 1500, 500, 0, true, RunStatus::Partial ; "one chunk failed")]
    #[test_case(false, 0, 2000, 0, true, RunStatus::Failed ; "everything failed")]
    #[test_case(true, 500, 0, 1500, true, RunStatus::Failed ; "systemic abort")]
    #[test_case(false, 500, 0, 1500, true, RunStatus::Partial ; "interrupted")]
    #[test_case(false, 10, 0, 0, false, RunStatus::Partial ; "validation failed")]
    fn test_classify_status(
        systemic: bool,
        loaded: usize,
        failed: usize,
        cancelled: usize,
        validation_passed: bool,
        expected: RunStatus,
    ) {
        assert_eq!(
            classify_status(systemic, loaded, failed, cancelled, validation_passed),
            expected
        );
    }

    #[test]
    fn test_add_chunk_counts() {
        let mut report = RunReport::new(Uuid::new_v4(), "nightly", RunMode::Incremental, false);
        report.add_chunk(&ChunkOutcome {
            index: 0,
            rows_loaded: 500,
            rows_failed: 0,
            rows_cancelled: 0,
            duplicates_skipped: 20,
            result: ChunkResult::Committed,
        });
        report.add_chunk(&ChunkOutcome::failed(1, 500, "boom".to_string(), false));
        report.add_chunk(&ChunkOutcome::cancelled(2, 300, true));

        assert_eq!(report.chunks_total, 3);
        assert_eq!(report.chunks_failed, 1);
        assert_eq!(report.rows_loaded, 500);
        assert_eq!(report.rows_failed, 500);
        assert_eq!(report.rows_cancelled, 300);
        assert_eq!(report.duplicates_skipped, 20);
        assert_eq!(report.total_rows(), 1300);
        assert!(report.interrupted);
    }

    #[test]
    fn test_success_rate() {
        let mut report = RunReport::new(Uuid::new_v4(), "nightly", RunMode::Full, false);
        assert_eq!(report.success_rate(), 100.0);

        report.rows_loaded = 1500;
        report.rows_failed = 500;
        assert_eq!(report.success_rate(), 75.0);
    }

    #[test]
    fn test_format_summary() {
        let mut report = RunReport::new(Uuid::new_v4(), "nightly", RunMode::Incremental, true);
        report.status = RunStatus::Partial;
        report.error_message = Some("1 chunk(s) rolled back".to_string());

        let text = report.format_summary();
        assert!(text.contains("partial"));
        assert!(text.contains("DRY RUN"));
        assert!(text.contains("1 chunk(s) rolled back"));
    }

    #[test]
    fn test_report_serializes() {
        let report = RunReport::new(Uuid::new_v4(), "nightly", RunMode::Full, false);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["mode"], "full");
    }
}
