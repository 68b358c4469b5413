//! Star-schema row models
//!
//! Dimension rows are keyed by a natural reference (patient code or the
//! reference row id) and carry a storage-issued surrogate key. Fact rows are
//! keyed by the operational id they summarize and only hold surrogate keys.

use crate::domain::ids::{
    ArtifactId, KeyKind, PatientCode, PatientId, ProcedureId, ReferenceId, SurrogateKey,
};
use crate::domain::operational::Severity;
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimension tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Patient,
    Facility,
    Modality,
    Diagnosis,
    Date,
}

impl DimensionKind {
    /// Qualified table name
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Patient => "analytics.dim_patient",
            Self::Facility => "analytics.dim_facility",
            Self::Modality => "analytics.dim_modality",
            Self::Diagnosis => "analytics.dim_diagnosis",
            Self::Date => "analytics.dim_date",
        }
    }

    /// Registry kind used to record issued surrogate keys
    ///
    /// The date dimension is keyed by its own `YYYYMMDD` value and is not registered.
    pub fn registry_kind(&self) -> Option<KeyKind> {
        match self {
            Self::Patient => Some(KeyKind::DimPatient),
            Self::Facility => Some(KeyKind::DimFacility),
            Self::Modality => Some(KeyKind::DimModality),
            Self::Diagnosis => Some(KeyKind::DimDiagnosis),
            Self::Date => None,
        }
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// `analytics.dim_patient`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimPatient {
    pub patient_code: PatientCode,
    pub patient_id: PatientId,
    pub sex: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub geographic_location: Option<String>,
    pub first_encounter_date: Option<NaiveDate>,
    pub last_encounter_date: Option<NaiveDate>,
    pub total_encounters: i32,
    pub is_synthetic: bool,
}

/// `analytics.dim_facility`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimFacility {
    pub facility_id: ReferenceId,
    pub facility_code: String,
    pub facility_name: String,
    pub location: Option<String>,
    pub facility_type: Option<String>,
}

/// `analytics.dim_modality`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimModality {
    pub modality_id: ReferenceId,
    pub modality_code: String,
    pub modality_name: String,
}

/// `analytics.dim_diagnosis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimDiagnosis {
    pub diagnosis_id: ReferenceId,
    pub diagnosis_code: String,
    pub diagnosis_name: String,
    pub category: String,
}

/// `analytics.dim_date`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimDate {
    pub date_key: i32,
    pub full_date: NaiveDate,
    pub year: i32,
    pub quarter: i32,
    pub month: i32,
    pub day: i32,
    pub iso_weekday: i32,
    pub is_weekend: bool,
}

impl DimDate {
    /// Calendar attributes of a date
    pub fn from_date(date: NaiveDate) -> Self {
        let month = date.month() as i32;
        Self {
            date_key: date_key(date),
            full_date: date,
            year: date.year(),
            quarter: (month - 1) / 3 + 1,
            month,
            day: date.day() as i32,
            iso_weekday: date.weekday().number_from_monday() as i32,
            is_weekend: matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }
}

/// `YYYYMMDD` key of a date
pub fn date_key(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

/// One dimension row to upsert
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionRow {
    Patient(DimPatient),
    Facility(DimFacility),
    Modality(DimModality),
    Diagnosis(DimDiagnosis),
    Date(DimDate),
}

impl DimensionRow {
    pub fn kind(&self) -> DimensionKind {
        match self {
            Self::Patient(_) => DimensionKind::Patient,
            Self::Facility(_) => DimensionKind::Facility,
            Self::Modality(_) => DimensionKind::Modality,
            Self::Diagnosis(_) => DimensionKind::Diagnosis,
            Self::Date(_) => DimensionKind::Date,
        }
    }

    /// Natural reference the row is keyed by
    pub fn natural_ref(&self) -> String {
        match self {
            Self::Patient(row) => row.patient_code.to_string(),
            Self::Facility(row) => row.facility_id.to_string(),
            Self::Modality(row) => row.modality_id.to_string(),
            Self::Diagnosis(row) => row.diagnosis_id.to_string(),
            Self::Date(row) => row.date_key.to_string(),
        }
    }
}

/// `analytics.fact_procedure`, one row per procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactProcedure {
    pub procedure_id: ProcedureId,
    pub procedure_code: String,
    pub patient_sk: SurrogateKey,
    pub facility_sk: SurrogateKey,
    pub modality_sk: SurrogateKey,
    /// Primary diagnosis, if the procedure has one
    pub diagnosis_sk: Option<SurrogateKey>,
    pub date_key: i32,
    pub projection_name: Option<String>,
    pub region_name: Option<String>,
    pub age_at_encounter: Option<i32>,
    pub finding_severity: Option<Severity>,
    pub is_abnormal: bool,
    pub diagnosis_count: i32,
    pub total_images: i32,
    pub report_word_count: i32,
    pub quality_score: f64,
    pub loaded_at: DateTime<Utc>,
}

/// `analytics.fact_language_usage`, one row per report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactLanguageUsage {
    pub report_id: ArtifactId,
    pub procedure_id: ProcedureId,
    pub patient_sk: SurrogateKey,
    pub facility_sk: SurrogateKey,
    pub date_key: i32,
    pub language_code: String,
    pub language_name: String,
    pub audio_language_code: Option<String>,
    pub audio_language_name: Option<String>,
    pub has_audio: bool,
    pub word_count: i32,
    pub loaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_key() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(date_key(date), 20240309);
    }

    #[test]
    fn test_dim_date_attributes() {
        // 2024-03-09 is a Saturday
        let dim = DimDate::from_date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(dim.quarter, 1);
        assert_eq!(dim.iso_weekday, 6);
        assert!(dim.is_weekend);

        let dim = DimDate::from_date(NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert_eq!(dim.quarter, 4);
        assert!(!dim.is_weekend);
    }

    #[test]
    fn test_registry_kinds() {
        assert_eq!(DimensionKind::Patient.registry_kind(), Some(KeyKind::DimPatient));
        assert_eq!(DimensionKind::Date.registry_kind(), None);
    }

    #[test]
    fn test_natural_ref() {
        let id = ReferenceId::generate();
        let row = DimensionRow::Modality(DimModality {
            modality_id: id,
            modality_code: "RF".to_string(),
            modality_name: "Radiofluoroscopy".to_string(),
        });
        assert_eq!(row.kind(), DimensionKind::Modality);
        assert_eq!(row.natural_ref(), id.to_string());
    }
}
