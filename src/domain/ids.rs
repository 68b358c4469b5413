//! Domain identifier types with validation
//!
//! Operational and reference rows are identified by random UUIDs generated by
//! the engine; warehouse dimensions by storage-generated integer surrogate
//! keys; source records by natural codes. Each has its own newtype so they
//! cannot be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| format!("Invalid {} '{}': {}", stringify!($name), s, e))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

record_id!(
    /// Identifier of a reference (master data) row
    ReferenceId
);
record_id!(
    /// Identifier of an operational patient row
    PatientId
);
record_id!(
    /// Identifier of an operational encounter row
    EncounterId
);
record_id!(
    /// Identifier of an operational procedure row
    ProcedureId
);
record_id!(
    /// Identifier of an image, report, finding, or diagnosis link row
    ArtifactId
);

/// Longest patient, reference or region code the schema stores
pub const MAX_CODE_LEN: usize = 50;

/// Longest encounter or image code the schema stores
pub const MAX_ENCOUNTER_CODE_LEN: usize = 100;

/// Longest name or free-text label column
pub const MAX_NAME_LEN: usize = 255;

/// Patient natural code (e.g. `PAT000000`)
///
/// # Examples
///
/// ```
/// use imaging_warehouse::domain::ids::PatientCode;
/// use std::str::FromStr;
///
/// let code = PatientCode::from_str("PAT000000").unwrap();
/// assert_eq!(code.as_str(), "PAT000000");
/// assert!(PatientCode::new("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatientCode(String);

impl PatientCode {
    /// Creates a new PatientCode, trimming surrounding whitespace
    pub fn new(code: impl Into<String>) -> Result<Self, String> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err("Patient code cannot be empty".to_string());
        }
        if trimmed.chars().count() > MAX_CODE_LEN {
            return Err(format!(
                "Patient code '{trimmed}' is longer than {MAX_CODE_LEN} characters"
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatientCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for PatientCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encounter natural code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EncounterCode(String);

impl EncounterCode {
    /// Creates a new EncounterCode, trimming surrounding whitespace
    pub fn new(code: impl Into<String>) -> Result<Self, String> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err("Encounter code cannot be empty".to_string());
        }
        if trimmed.chars().count() > MAX_ENCOUNTER_CODE_LEN {
            return Err(format!(
                "Encounter code is longer than {MAX_ENCOUNTER_CODE_LEN} characters"
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Natural code of the n-th (1-based) procedure of this encounter
    pub fn procedure_code(&self, position: usize) -> String {
        format!("{}-P{}", self.0, position)
    }
}

impl fmt::Display for EncounterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EncounterCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for EncounterCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Warehouse-local surrogate key of a dimension row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurrogateKey(i64);

impl SurrogateKey {
    /// Wraps a storage-generated key
    pub fn new(key: i64) -> Self {
        Self(key)
    }

    /// Returns the raw key
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SurrogateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Namespace of a natural-key registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Patient,
    Encounter,
    Procedure,
    DimPatient,
    DimFacility,
    DimModality,
    DimDiagnosis,
}

impl KeyKind {
    /// Kinds whose values are warehouse surrogate keys
    pub const SURROGATE: [KeyKind; 4] = [
        KeyKind::DimPatient,
        KeyKind::DimFacility,
        KeyKind::DimModality,
        KeyKind::DimDiagnosis,
    ];

    /// Stored form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Encounter => "encounter",
            Self::Procedure => "procedure",
            Self::DimPatient => "dim_patient",
            Self::DimFacility => "dim_facility",
            Self::DimModality => "dim_modality",
            Self::DimDiagnosis => "dim_diagnosis",
        }
    }

    /// Whether entries of this kind map to surrogate keys
    pub fn is_surrogate(&self) -> bool {
        Self::SURROGATE.contains(self)
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value side of a natural-key registry entry
///
/// Operational entities map to their UUID; dimension entries map to the
/// surrogate key the warehouse issued for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalId {
    /// Operational row identifier
    Record(Uuid),
    /// Dimension surrogate key
    Surrogate(i64),
}

impl InternalId {
    /// Returns the record UUID, if this is a record id
    pub fn as_record(&self) -> Option<Uuid> {
        match self {
            Self::Record(id) => Some(*id),
            Self::Surrogate(_) => None,
        }
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(id) => write!(f, "{id}"),
            Self::Surrogate(key) => write!(f, "{key}"),
        }
    }
}

impl FromStr for InternalId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(key) = s.parse::<i64>() {
            return Ok(Self::Surrogate(key));
        }
        Uuid::parse_str(s)
            .map(Self::Record)
            .map_err(|_| format!("Invalid internal id '{s}'"))
    }
}

impl From<PatientId> for InternalId {
    fn from(id: PatientId) -> Self {
        Self::Record(*id.as_uuid())
    }
}

impl From<EncounterId> for InternalId {
    fn from(id: EncounterId) -> Self {
        Self::Record(*id.as_uuid())
    }
}

impl From<ProcedureId> for InternalId {
    fn from(id: ProcedureId) -> Self {
        Self::Record(*id.as_uuid())
    }
}

impl From<SurrogateKey> for InternalId {
    fn from(key: SurrogateKey) -> Self {
        Self::Surrogate(key.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_code_trims() {
        let code = PatientCode::new("  PAT000001 ").unwrap();
        assert_eq!(code.as_str(), "PAT000001");
        assert_eq!(code.to_string(), "PAT000001");
    }

    #[test]
    fn test_patient_code_empty() {
        assert!(PatientCode::new("").is_err());
        assert!(PatientCode::from_str("   ").is_err());
    }

    #[test]
    fn test_code_length_limits() {
        assert!(PatientCode::new("P".repeat(MAX_CODE_LEN)).is_ok());
        assert!(PatientCode::new("P".repeat(MAX_CODE_LEN + 1)).is_err());
        assert!(EncounterCode::new("E".repeat(MAX_ENCOUNTER_CODE_LEN)).is_ok());
        assert!(EncounterCode::new("E".repeat(MAX_ENCOUNTER_CODE_LEN + 1)).is_err());
    }

    #[test]
    fn test_encounter_code_procedure_code() {
        let code = EncounterCode::new("ENC-42").unwrap();
        assert_eq!(code.procedure_code(1), "ENC-42-P1");
        assert_eq!(code.procedure_code(3), "ENC-42-P3");
    }

    #[test]
    fn test_record_ids_are_unique() {
        let a = PatientId::generate();
        let b = PatientId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_id_parse() {
        let id = ReferenceId::generate();
        let parsed = ReferenceId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(ReferenceId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_key_kind_surrogates() {
        assert!(KeyKind::DimFacility.is_surrogate());
        assert!(!KeyKind::Encounter.is_surrogate());
        assert_eq!(KeyKind::DimDiagnosis.as_str(), "dim_diagnosis");
    }

    #[test]
    fn test_internal_id_text_form() {
        let surrogate = InternalId::Surrogate(17);
        assert_eq!(surrogate.to_string(), "17");
        assert_eq!(InternalId::from_str("17").unwrap(), surrogate);

        let record: InternalId = PatientId::generate().into();
        assert_eq!(InternalId::from_str(&record.to_string()).unwrap(), record);
        assert!(record.as_record().is_some());
        assert!(surrogate.as_record().is_none());
    }
}
