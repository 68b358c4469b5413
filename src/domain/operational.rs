//! Operational row models
//!
//! The normalized graph is patient → encounter → procedure → artifacts.
//! Rows are created by the operational writer only; the analytics side reads
//! them and never writes them back.

use crate::domain::errors::WarehouseError;
use crate::domain::ids::{
    ArtifactId, EncounterCode, EncounterId, PatientCode, PatientId, ProcedureId, ReferenceId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl Severity {
    /// Stored form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Mild => "Mild",
            Self::Moderate => "Moderate",
            Self::Severe => "Severe",
            Self::Critical => "Critical",
        }
    }

    /// Severity implied by a set of diagnosis labels
    ///
    /// No labels, or the single label `normal`, is Normal; otherwise the
    /// severity grows with the number of labels.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let labels: Vec<&str> = labels
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .collect();

        match labels.as_slice() {
            [] => Self::Normal,
            [only] if only.eq_ignore_ascii_case("normal") => Self::Normal,
            [_] => Self::Mild,
            [_, _] => Self::Moderate,
            [_, _, _] => Self::Severe,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(Self::Normal),
            "Mild" => Ok(Self::Mild),
            "Moderate" => Ok(Self::Moderate),
            "Severe" => Ok(Self::Severe),
            "Critical" => Ok(Self::Critical),
            other => Err(WarehouseError::ValueRange(format!(
                "Unknown finding severity '{other}'"
            ))),
        }
    }
}

/// `operational.patients`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRow {
    pub id: PatientId,
    pub patient_code: PatientCode,
    pub sex: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub reported_age: Option<i32>,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<i32>,
    pub geographic_location: Option<String>,
    pub is_synthetic: bool,
    pub first_encounter_date: Option<NaiveDate>,
    pub last_encounter_date: Option<NaiveDate>,
    pub total_encounters: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientRow {
    /// Applies one more encounter to the rolling aggregates
    pub fn apply_encounter(&mut self, date: NaiveDate, now: DateTime<Utc>) {
        self.total_encounters += 1;
        self.first_encounter_date = Some(match self.first_encounter_date {
            Some(first) => first.min(date),
            None => date,
        });
        self.last_encounter_date = Some(match self.last_encounter_date {
            Some(last) => last.max(date),
            None => date,
        });
        self.updated_at = now;
    }
}

/// `operational.encounters`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRow {
    pub id: EncounterId,
    pub encounter_code: EncounterCode,
    pub patient_id: PatientId,
    pub facility_id: ReferenceId,
    pub encounter_at: DateTime<Utc>,
    pub referring_physician: Option<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `operational.procedures`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureRow {
    pub id: ProcedureId,
    pub procedure_code: String,
    pub encounter_id: EncounterId,
    pub modality_id: ReferenceId,
    pub projection_id: Option<ReferenceId>,
    pub region_id: Option<ReferenceId>,
    pub procedure_at: DateTime<Utc>,
    pub technician_name: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `operational.radiological_images`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRow {
    pub id: ArtifactId,
    pub procedure_id: ProcedureId,
    pub image_code: String,
    pub filename: String,
    pub path: String,
    pub study_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `operational.clinical_reports`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub id: ArtifactId,
    pub procedure_id: ProcedureId,
    pub language_id: ReferenceId,
    pub text: String,
    pub report_type: String,
    pub word_count: i32,
    pub summary: String,
    pub has_audio: bool,
    pub audio_language_id: Option<ReferenceId>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// `operational.findings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRow {
    pub id: ArtifactId,
    pub procedure_id: ProcedureId,
    pub findings_text: String,
    pub impression_text: Option<String>,
    pub severity: Severity,
    pub abnormality_detected: bool,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// `operational.procedure_diagnosis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisLinkRow {
    pub id: ArtifactId,
    pub procedure_id: ProcedureId,
    pub diagnosis_id: ReferenceId,
    pub sequence: i32,
    pub is_primary: bool,
    pub confidence: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything the analytics transformer needs about one procedure
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureGraph {
    pub procedure: ProcedureRow,
    pub encounter: EncounterRow,
    pub patient: PatientRow,
    pub images: Vec<ImageRow>,
    pub reports: Vec<ReportRow>,
    pub findings: Vec<FindingRow>,
    pub links: Vec<DiagnosisLinkRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[], Severity::Normal)]
    #[test_case(&["normal"], Severity::Normal)]
    #[test_case(&["Normal "], Severity::Normal)]
    #[test_case(&["pneumonia"], Severity::Mild)]
    #[test_case(&["pneumonia", "effusion"], Severity::Moderate)]
    #[test_case(&["pneumonia", "effusion", "edema"], Severity::Severe)]
    #[test_case(&["a", "b", "c", "d"], Severity::Critical)]
    #[test_case(&["", "  "], Severity::Normal)]
    fn test_severity_from_labels(labels: &[&str], expected: Severity) {
        assert_eq!(Severity::from_labels(labels), expected);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Normal < Severity::Mild);
        assert!(Severity::Mild < Severity::Moderate);
        assert!(Severity::Severe < Severity::Critical);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::from_str("Severe").unwrap(), Severity::Severe);
        assert!(Severity::from_str("Extreme").is_err());
    }

    #[test]
    fn test_patient_rollup() {
        let now = Utc::now();
        let mut patient = PatientRow {
            id: PatientId::generate(),
            patient_code: PatientCode::new("PAT1").unwrap(),
            sex: None,
            date_of_birth: None,
            reported_age: None,
            height_cm: None,
            weight_kg: None,
            geographic_location: None,
            is_synthetic: false,
            first_encounter_date: None,
            last_encounter_date: None,
            total_encounters: 0,
            created_at: now,
            updated_at: now,
        };
        let later = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let earlier = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        patient.apply_encounter(later, now);
        patient.apply_encounter(earlier, now);

        assert_eq!(patient.total_encounters, 2);
        assert_eq!(patient.first_encounter_date, Some(earlier));
        assert_eq!(patient.last_encounter_date, Some(later));
    }
}
