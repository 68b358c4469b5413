//! Domain models and types for the imaging warehouse.
//!
//! This module contains the typed input records, the operational and
//! star-schema row models, and the error taxonomy shared by every layer.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`PatientId`], [`ProcedureId`], [`SurrogateKey`], ...)
//! - **Input records** ([`EncounterRecord`] and its specs)
//! - **Row models** for the operational, analytics and audit schemas
//! - **Error types** ([`WarehouseError`], [`ErrorClass`])
//! - **Result type alias** ([`Result`])
//!
//! # Type Safety
//!
//! Identifiers use the newtype pattern so a procedure id cannot be passed
//! where a patient id is expected:
//!
//! ```rust
//! use imaging_warehouse::domain::{PatientCode, PatientId, ProcedureId};
//!
//! let patient = PatientId::generate();
//! let code = PatientCode::new("PAT000000").unwrap();
//! // let wrong: ProcedureId = patient;  // Compile error!
//! # let _ = (patient, code);
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, WarehouseError>`]. Each error
//! has an [`ErrorClass`] that decides whether it fails a record, a chunk, or
//! the whole run:
//!
//! ```rust
//! use imaging_warehouse::domain::{ErrorClass, WarehouseError};
//!
//! let err = WarehouseError::ValueRange("confidence 1.5".to_string());
//! assert_eq!(err.class(), ErrorClass::ValueRange);
//! assert!(!err.is_systemic());
//! ```

pub mod analytics;
pub mod audit;
pub mod errors;
pub mod ids;
pub mod operational;
pub mod records;
pub mod reference;
pub mod result;

// Re-export commonly used types for convenience
pub use analytics::{DimensionKind, DimensionRow, FactLanguageUsage, FactProcedure};
pub use audit::{
    AuditEntry, MutationKind, QualityIssue, QualitySeverity, QualityStage, RunAuditRecord,
    RunMode, RunStatus, TableCount,
};
pub use errors::{ErrorClass, WarehouseError};
pub use ids::{
    ArtifactId, EncounterCode, EncounterId, InternalId, KeyKind, PatientCode, PatientId,
    ProcedureId, ReferenceId, SurrogateKey,
};
pub use operational::Severity;
pub use records::EncounterRecord;
pub use reference::{DisplayFields, EntityType, ReferenceEntity};
pub use result::Result;
