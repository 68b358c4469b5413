//! Audit, quality-log and run-summary records

use crate::domain::errors::{ErrorClass, WarehouseError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of row mutation recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `audit.row_change_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: Uuid,
    pub table_name: String,
    pub row_id: String,
    pub operation: MutationKind,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub actor: String,
    pub changed_at: DateTime<Utc>,
}

/// Severity of a data-quality issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualitySeverity {
    Info,
    Warning,
    Error,
}

impl QualitySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for QualitySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage that detected a quality issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStage {
    /// Structural record checks before any write
    Precheck,
    /// Master data resolution and operational writes
    Operational,
    /// Dimension and fact population
    Analytics,
    /// Post-run integrity scans
    Validation,
}

impl QualityStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precheck => "precheck",
            Self::Operational => "operational",
            Self::Analytics => "analytics",
            Self::Validation => "validation",
        }
    }
}

/// One row of `audit.data_quality_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub run_id: Uuid,
    pub detected_at: DateTime<Utc>,
    pub severity: QualitySeverity,
    pub stage: QualityStage,
    pub record_key: String,
    pub error_class: ErrorClass,
    pub message: String,
    pub is_synthetic: bool,
}

impl QualityIssue {
    /// ERROR-level issue built from an engine error
    pub fn from_error(
        run_id: Uuid,
        stage: QualityStage,
        record_key: impl Into<String>,
        error: &WarehouseError,
        is_synthetic: bool,
    ) -> Self {
        Self {
            run_id,
            detected_at: Utc::now(),
            severity: QualitySeverity::Error,
            stage,
            record_key: record_key.into(),
            error_class: error.class(),
            message: error.to_string(),
            is_synthetic,
        }
    }
}

/// Outcome of one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(WarehouseError::Serialization(format!(
                "Unknown run status '{other}'"
            ))),
        }
    }
}

/// Load mode of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Process changes since the stored checkpoint
    #[default]
    Incremental,
    /// Rebuild analytics tables from all operational rows
    Full,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "full" => Ok(Self::Full),
            other => Err(WarehouseError::Configuration(format!(
                "Invalid run mode '{other}'. Must be one of: incremental, full"
            ))),
        }
    }
}

/// One row of `audit.etl_run_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAuditRecord {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub rows_loaded: i64,
    pub rows_failed: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// Row counts of the warehouse tables, for status output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableCount {
    pub table_name: String,
    pub rows: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_issue_from_error() {
        let run_id = Uuid::new_v4();
        let err = WarehouseError::ValueRange("confidence 1.5 outside [0,1]".to_string());
        let issue = QualityIssue::from_error(run_id, QualityStage::Operational, "PAT1/E1", &err, true);
        assert_eq!(issue.severity, QualitySeverity::Error);
        assert_eq!(issue.error_class, ErrorClass::ValueRange);
        assert!(issue.message.contains("1.5"));
        assert!(issue.is_synthetic);
    }

    #[test]
    fn test_run_status_parse() {
        assert_eq!(RunStatus::from_str("partial").unwrap(), RunStatus::Partial);
        assert!(RunStatus::from_str("running").is_err());
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_run_mode_parse() {
        assert_eq!(RunMode::from_str("FULL").unwrap(), RunMode::Full);
        assert_eq!(RunMode::default(), RunMode::Incremental);
        assert!(matches!(
            RunMode::from_str("delta"),
            Err(WarehouseError::Configuration(_))
        ));
    }

    #[test]
    fn test_serialized_forms() {
        assert_eq!(serde_json::to_string(&MutationKind::Insert).unwrap(), "\"INSERT\"");
        assert_eq!(serde_json::to_string(&QualitySeverity::Warning).unwrap(), "\"WARNING\"");
        assert_eq!(serde_json::to_string(&RunMode::Full).unwrap(), "\"full\"");
    }
}
