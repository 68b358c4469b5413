//! Post-run integrity scans
//!
//! Runs every [`IntegrityCheck`] in one read-only unit of work, which is
//! always rolled back.

use crate::adapters::database::traits::{IntegrityCheck, WarehouseStore};
use crate::core::validation::report::ValidationReport;
use crate::domain::Result;
use std::sync::Arc;
use std::time::Instant;

/// Referential-integrity and value-range scanner
pub struct IntegrityValidator {
    store: Arc<dyn WarehouseStore>,
}

impl IntegrityValidator {
    pub fn new(store: Arc<dyn WarehouseStore>) -> Self {
        Self { store }
    }

    /// Run every check and collect the violation counts
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let start = Instant::now();
        let mut report = ValidationReport::new();

        let mut tx = self.store.begin().await?;
        for check in IntegrityCheck::ALL {
            let violations = tx.count_violations(check).await?;
            if violations > 0 {
                tracing::warn!(check = check.name(), violations, "Validation check failed");
            }
            report.record(check, violations);
        }
        tx.rollback().await?;

        report.set_duration(start.elapsed().as_millis() as u64);
        tracing::info!(
            checks = report.checks.len(),
            violations = report.total_violations(),
            duration_ms = report.duration_ms,
            "Validation completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::WarehouseError;

    #[tokio::test]
    async fn test_empty_warehouse_passes() {
        let validator = IntegrityValidator::new(Arc::new(MemoryStore::new()));
        let report = validator.validate().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.checks.len(), IntegrityCheck::ALL.len());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let err = IntegrityValidator::new(store).validate().await.unwrap_err();
        assert!(matches!(err, WarehouseError::Systemic(_)));
    }
}
