//! Watermark model for tracking incremental load state
//!
//! One watermark exists per pipeline. It records the operational
//! `updated_at` high-water mark the analytics side has consumed, plus the
//! procedures whose facts were deferred and must be retried.

use crate::domain::ids::ProcedureId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Load status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    /// A run is in progress
    InProgress,
    /// The last run finished (success or partial)
    Completed,
    /// The last run failed
    Failed,
    /// No run has started yet
    #[default]
    NotStarted,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NotStarted => "not_started",
        }
    }
}

/// Point from which the analytics transformer reads operational changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Rows with `updated_at >= since` are considered changed; `None` means everything
    pub since: Option<DateTime<Utc>>,

    /// Procedures whose facts were deferred by an earlier pass
    pub pending: Vec<ProcedureId>,
}

impl Checkpoint {
    /// Checkpoint covering every operational row
    pub fn full() -> Self {
        Self::default()
    }

    /// Checkpoint covering changes since a point in time
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            pending: Vec::new(),
        }
    }
}

/// Watermark for tracking load state per pipeline
///
/// # Examples
///
/// ```
/// use imaging_warehouse::core::state::watermark::{LoadStatus, Watermark};
///
/// let watermark = Watermark::new("imaging_warehouse_load");
///
/// assert_eq!(watermark.last_run_status, LoadStatus::NotStarted);
/// assert!(watermark.last_checkpoint.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    /// Pipeline this watermark tracks
    pub pipeline_name: String,

    /// Operational high-water mark consumed by the analytics side
    pub last_checkpoint: Option<DateTime<Utc>>,

    /// Procedures whose fact build was deferred
    pub pending_procedures: Vec<ProcedureId>,

    /// Rows loaded across all runs
    pub total_rows_loaded: u64,

    /// Rows failed across all runs
    pub total_rows_failed: u64,

    /// Id of the last run
    pub last_run_id: Option<Uuid>,

    /// When the last run started
    pub last_run_started_at: DateTime<Utc>,

    /// When the last run finished (None if still in progress)
    pub last_run_completed_at: Option<DateTime<Utc>>,

    /// Status of the last run
    pub last_run_status: LoadStatus,
}

impl Watermark {
    /// Fresh watermark for a pipeline that has never run
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            last_checkpoint: None,
            pending_procedures: Vec::new(),
            total_rows_loaded: 0,
            total_rows_failed: 0,
            last_run_id: None,
            last_run_started_at: Utc::now(),
            last_run_completed_at: None,
            last_run_status: LoadStatus::NotStarted,
        }
    }

    /// Check if a run is currently in progress
    pub fn is_in_progress(&self) -> bool {
        self.last_run_status == LoadStatus::InProgress
    }

    /// Check if the last run completed
    pub fn is_completed(&self) -> bool {
        self.last_run_status == LoadStatus::Completed
    }

    /// Check if the last run failed
    pub fn is_failed(&self) -> bool {
        self.last_run_status == LoadStatus::Failed
    }

    /// Duration of the last run if it finished
    pub fn last_run_duration(&self) -> Option<chrono::Duration> {
        self.last_run_completed_at
            .map(|completed| completed - self.last_run_started_at)
    }

    /// Checkpoint the next analytics pass should start from
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            since: self.last_checkpoint,
            pending: self.pending_procedures.clone(),
        }
    }

    /// Mark a run as started
    pub fn mark_started(&mut self, run_id: Uuid) {
        self.last_run_id = Some(run_id);
        self.last_run_started_at = Utc::now();
        self.last_run_status = LoadStatus::InProgress;
        self.last_run_completed_at = None;
    }

    /// Mark the run as completed
    pub fn mark_completed(&mut self) {
        self.last_run_completed_at = Some(Utc::now());
        self.last_run_status = LoadStatus::Completed;
    }

    /// Mark the run as failed
    pub fn mark_failed(&mut self) {
        self.last_run_completed_at = Some(Utc::now());
        self.last_run_status = LoadStatus::Failed;
    }

    /// Record the outcome of the analytics passes of a run
    ///
    /// The checkpoint only moves forward. Pending procedures are replaced by
    /// the ones still deferred at the end of this run.
    pub fn advance(
        &mut self,
        high_water: Option<DateTime<Utc>>,
        still_pending: Vec<ProcedureId>,
        rows_loaded: u64,
        rows_failed: u64,
    ) {
        if let Some(high_water) = high_water {
            self.last_checkpoint = Some(match self.last_checkpoint {
                Some(current) => current.max(high_water),
                None => high_water,
            });
        }
        self.pending_procedures = still_pending;
        self.total_rows_loaded += rows_loaded;
        self.total_rows_failed += rows_failed;
    }
}
