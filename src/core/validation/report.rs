//! Validation report structures

use crate::adapters::database::traits::IntegrityCheck;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one integrity or value-range check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Check name
    pub name: String,

    /// Whether the check scans references (as opposed to value ranges)
    pub referential: bool,

    /// Number of violating rows
    pub violations: u64,
}

impl CheckOutcome {
    pub fn new(check: IntegrityCheck, violations: u64) -> Self {
        Self {
            name: check.name().to_string(),
            referential: check.is_referential(),
            violations,
        }
    }

    pub fn passed(&self) -> bool {
        self.violations == 0
    }
}

/// Post-run validation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// When the scans ran
    pub validated_at: DateTime<Utc>,

    /// One entry per check, in reporting order
    pub checks: Vec<CheckOutcome>,

    /// Duration of the scans in milliseconds
    pub duration_ms: u64,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            validated_at: Utc::now(),
            checks: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn record(&mut self, check: IntegrityCheck, violations: u64) {
        self.checks.push(CheckOutcome::new(check, violations));
    }

    pub fn set_duration(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
    }

    /// All checks found zero violations
    pub fn is_success(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }

    /// Total violating rows across all checks
    pub fn total_violations(&self) -> u64 {
        self.checks.iter().map(|c| c.violations).sum()
    }

    /// Checks that found violations
    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed())
    }

    /// Format the report as a human-readable string
    pub fn format_summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str("🔎 Validation Report\n");
        summary.push_str(&format!("  Validated at: {}\n", self.validated_at));
        summary.push_str(&format!("  Duration: {} ms\n", self.duration_ms));
        for check in &self.checks {
            let mark = if check.passed() { "✅" } else { "❌" };
            let kind = if check.referential {
                "integrity"
            } else {
                "value range"
            };
            summary.push_str(&format!(
                "  {mark} {} ({kind}): {} violation(s)\n",
                check.name, check.violations
            ));
        }
        summary
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_is_success() {
        let report = ValidationReport::new();
        assert!(report.is_success());
        assert_eq!(report.total_violations(), 0);
    }

    #[test]
    fn test_record_violations() {
        let mut report = ValidationReport::new();
        report.record(IntegrityCheck::OrphanFactDimensions, 0);
        report.record(IntegrityCheck::ConfidenceOutOfRange, 3);

        assert!(!report.is_success());
        assert_eq!(report.total_violations(), 3);
        let failed: Vec<_> = report.failures().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["confidence_out_of_range"]);
        assert!(!report.checks[1].referential);
    }

    #[test]
    fn test_format_summary_lists_checks() {
        let mut report = ValidationReport::new();
        report.record(IntegrityCheck::DiagnosisCountMismatch, 1);
        let text = report.format_summary();
        assert!(text.contains("diagnosis_count_mismatch"));
        assert!(text.contains("1 violation(s)"));
    }
}
