//! Reference (master data) entities
//!
//! Reference rows are created lazily on first use, never deleted, and only
//! changed by administrative action. A natural code is unique within its
//! entity type.

use crate::domain::errors::WarehouseError;
use crate::domain::ids::ReferenceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of reference entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Facility,
    Modality,
    Projection,
    AnatomicalRegion,
    Diagnosis,
    Language,
}

impl EntityType {
    /// All entity types, in resolution order
    pub const ALL: [EntityType; 6] = [
        EntityType::Facility,
        EntityType::Modality,
        EntityType::Projection,
        EntityType::AnatomicalRegion,
        EntityType::Diagnosis,
        EntityType::Language,
    ];

    /// Stable name of the entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facility => "facility",
            Self::Modality => "modality",
            Self::Projection => "projection",
            Self::AnatomicalRegion => "anatomical_region",
            Self::Diagnosis => "diagnosis",
            Self::Language => "language",
        }
    }

    /// Qualified table holding this entity type
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Facility => "master.facility_master",
            Self::Modality => "master.modality_master",
            Self::Projection => "master.projection_master",
            Self::AnatomicalRegion => "master.anatomical_region_master",
            Self::Diagnosis => "master.diagnosis_master",
            Self::Language => "master.language_registry",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "facility" => Ok(Self::Facility),
            "modality" => Ok(Self::Modality),
            "projection" => Ok(Self::Projection),
            "anatomical_region" => Ok(Self::AnatomicalRegion),
            "diagnosis" => Ok(Self::Diagnosis),
            "language" => Ok(Self::Language),
            other => Err(WarehouseError::Resolution(format!(
                "Unknown reference entity type '{other}'"
            ))),
        }
    }
}

/// Descriptive fields supplied when a reference row is first created
///
/// Only the first writer's fields are kept; later resolutions of the same
/// code never update them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayFields {
    /// Human-readable name
    pub name: String,

    /// Entity-specific attributes (facility type, diagnosis category, ...)
    #[serde(default = "empty_attributes")]
    pub attributes: serde_json::Value,
}

impl DisplayFields {
    /// Display fields with a name and no attributes
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: empty_attributes(),
        }
    }

    /// Adds a string attribute
    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.attributes {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Reads a string attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

fn empty_attributes() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// A stored reference row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntity {
    pub id: ReferenceId,
    pub entity_type: EntityType,
    pub code: String,
    pub display: DisplayFields,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("facility", EntityType::Facility)]
    #[test_case("modality", EntityType::Modality)]
    #[test_case("projection", EntityType::Projection)]
    #[test_case("anatomical_region", EntityType::AnatomicalRegion)]
    #[test_case("diagnosis", EntityType::Diagnosis)]
    #[test_case("language", EntityType::Language)]
    fn test_entity_type_parse(input: &str, expected: EntityType) {
        assert_eq!(EntityType::from_str(input).unwrap(), expected);
        assert_eq!(expected.as_str(), input);
    }

    #[test_case("patient")]
    #[test_case("Facility")]
    #[test_case("")]
    fn test_entity_type_rejects_unknown(input: &str) {
        let err = EntityType::from_str(input).unwrap_err();
        assert!(matches!(err, WarehouseError::Resolution(_)));
    }

    #[test]
    fn test_table_names_are_distinct() {
        let mut tables: Vec<_> = EntityType::ALL.iter().map(|e| e.table_name()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), 6);
    }

    #[test]
    fn test_display_fields_attributes() {
        let fields = DisplayFields::named("Pneumonia").with_attribute("category", "Infectious");
        assert_eq!(fields.name, "Pneumonia");
        assert_eq!(fields.attribute("category"), Some("Infectious"));
        assert_eq!(fields.attribute("missing"), None);
    }
}
