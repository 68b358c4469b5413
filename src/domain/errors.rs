//! Domain error types
//!
//! This module defines the error hierarchy for the warehouse engine.
//! Errors carry owned messages and never expose driver types, so callers can
//! classify and log them without depending on the storage backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main warehouse error type
///
/// The first group of variants is the engine taxonomy used to decide how far a
/// failure propagates (single record, chunk, or whole run). The remaining
/// variants cover the ambient concerns (configuration, state, I/O).
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A reference could not be resolved or auto-created (e.g. empty code, unknown entity type)
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Uniqueness, foreign-key, or registry mapping violation
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A value outside its permitted range was rejected at the write boundary
    #[error("Value range error: {0}")]
    ValueRange(String),

    /// A fact was built before one of its dimensions existed
    #[error("Dependency ordering error: {0}")]
    DependencyOrdering(String),

    /// Two writers raced on the same unseen reference code and the loser could not re-select it
    #[error("Duplicate code race on {entity} '{code}'")]
    DuplicateCodeRace {
        /// Entity type name
        entity: String,
        /// Natural code being resolved
        code: String,
    },

    /// Natural key lookup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage-level failure scoped to the current unit of work
    #[error("Database error: {0}")]
    Database(String),

    /// Storage unavailable or otherwise unusable; aborts the run
    #[error("Systemic error: {0}")]
    Systemic(String),

    /// Watermark / checkpoint state errors
    #[error("State management error: {0}")]
    State(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an error, recorded in the quality log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Unknown or malformed reference
    Resolution,
    /// Duplicate keys, missing foreign keys, registry conflicts
    Integrity,
    /// Out-of-range values
    ValueRange,
    /// Fact built before its dimension
    DependencyOrdering,
    /// Storage unavailable
    Systemic,
    /// Anything else
    Other,
}

impl ErrorClass {
    /// Stable string form used in persisted logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::Integrity => "integrity",
            Self::ValueRange => "value_range",
            Self::DependencyOrdering => "dependency_ordering",
            Self::Systemic => "systemic",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WarehouseError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Resolution(_) => ErrorClass::Resolution,
            Self::Integrity(_) | Self::DuplicateCodeRace { .. } => ErrorClass::Integrity,
            Self::ValueRange(_) => ErrorClass::ValueRange,
            Self::DependencyOrdering(_) => ErrorClass::DependencyOrdering,
            Self::Systemic(_) => ErrorClass::Systemic,
            _ => ErrorClass::Other,
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::Systemic(_))
    }

    /// Whether this error is scoped to a single record or chunk
    pub fn is_row_scoped(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Resolution
                | ErrorClass::Integrity
                | ErrorClass::ValueRange
                | ErrorClass::DependencyOrdering
        )
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for WarehouseError {
    fn from(err: std::io::Error) -> Self {
        WarehouseError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for WarehouseError {
    fn from(err: serde_json::Error) -> Self {
        WarehouseError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for WarehouseError {
    fn from(err: toml::de::Error) -> Self {
        WarehouseError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warehouse_error_display() {
        let err = WarehouseError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_duplicate_code_race_display() {
        let err = WarehouseError::DuplicateCodeRace {
            entity: "facility".to_string(),
            code: "TEACHING_HOSPITAL".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Duplicate code race on facility 'TEACHING_HOSPITAL'"
        );
        assert_eq!(err.class(), ErrorClass::Integrity);
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            WarehouseError::ValueRange("confidence 1.5".into()).class(),
            ErrorClass::ValueRange
        );
        assert_eq!(
            WarehouseError::Resolution("empty code".into()).class(),
            ErrorClass::Resolution
        );
        assert_eq!(
            WarehouseError::Database("deadlock".into()).class(),
            ErrorClass::Other
        );
        assert!(WarehouseError::Systemic("pool closed".into()).is_systemic());
        assert!(!WarehouseError::Integrity("dup".into()).is_systemic());
    }

    #[test]
    fn test_row_scoped_errors() {
        assert!(WarehouseError::Integrity("dup".into()).is_row_scoped());
        assert!(WarehouseError::DependencyOrdering("dim".into()).is_row_scoped());
        assert!(!WarehouseError::Systemic("down".into()).is_row_scoped());
        assert!(!WarehouseError::Database("timeout".into()).is_row_scoped());
    }

    #[test]
    fn test_error_class_as_str() {
        assert_eq!(ErrorClass::ValueRange.as_str(), "value_range");
        assert_eq!(ErrorClass::DependencyOrdering.to_string(), "dependency_ordering");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: WarehouseError = io_err.into();
        assert!(matches!(err, WarehouseError::Io(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: WarehouseError = json_err.into();
        assert!(matches!(err, WarehouseError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: WarehouseError = toml_err.into();
        assert!(matches!(err, WarehouseError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_warehouse_error_implements_std_error() {
        let err = WarehouseError::Integrity("Test error".to_string());
        let _: &dyn std::error::Error = &err;
    }
}
