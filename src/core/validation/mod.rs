//! Post-run validation: referential-integrity and value-range scans

pub mod checks;
pub mod report;

pub use checks::IntegrityValidator;
pub use report::{CheckOutcome, ValidationReport};
