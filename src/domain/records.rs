//! Typed input records
//!
//! The engine receives already-validated encounter records from the ingestion
//! step. One [`EncounterRecord`] describes a single clinical visit together
//! with its patient, facility, procedures and clinical artifacts.
//!
//! Only structural checks happen here: required codes and the column widths
//! of the warehouse schema. Value ranges such as confidence scores are
//! enforced by the persistence layer.

use crate::domain::errors::WarehouseError;
use crate::domain::ids::{
    EncounterCode, PatientCode, MAX_CODE_LEN, MAX_ENCOUNTER_CODE_LEN, MAX_NAME_LEN,
};
use crate::domain::operational::Severity;
use crate::domain::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One clinical visit as delivered by the ingestion step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRecord {
    pub patient: PatientSpec,
    pub facility: FacilitySpec,
    pub encounter: EncounterSpec,
}

impl EncounterRecord {
    /// Structural checks run before anything is written
    ///
    /// # Errors
    ///
    /// Returns a `Resolution` error naming the first empty or over-long field.
    pub fn validate(&self) -> Result<()> {
        self.patient.code()?;
        self.facility.natural_code()?;
        self.encounter.code()?;

        let widths = [
            ("patient sex", self.patient.sex.as_deref(), 10),
            ("patient location", self.patient.geographic_location.as_deref(), MAX_NAME_LEN),
            ("facility name", Some(self.facility.name.as_str()), MAX_NAME_LEN),
            ("facility location", self.facility.location.as_deref(), MAX_NAME_LEN),
            ("facility type", self.facility.facility_type.as_deref(), 100),
            (
                "referring physician",
                self.encounter.referring_physician.as_deref(),
                MAX_NAME_LEN,
            ),
        ];
        for (field, value, max) in widths {
            if let Some(value) = value {
                check_width(field, value, max).map_err(WarehouseError::Resolution)?;
            }
        }

        for (position, procedure) in self.encounter.procedures.iter().enumerate() {
            procedure.validate().map_err(|e| {
                WarehouseError::Resolution(format!(
                    "encounter '{}' procedure {}: {}",
                    self.encounter.encounter_code.trim(),
                    position + 1,
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Key used to identify this record in logs and the quality log
    pub fn record_key(&self) -> String {
        format!(
            "{}/{}",
            self.patient.patient_code.trim(),
            self.encounter.encounter_code.trim()
        )
    }
}

/// Patient demographics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSpec {
    pub patient_code: String,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    /// Age as reported by the source; kept for reference only, never used for analytics
    #[serde(default)]
    pub reported_age: Option<i32>,
    #[serde(default)]
    pub height_cm: Option<i32>,
    #[serde(default)]
    pub weight_kg: Option<i32>,
    #[serde(default)]
    pub geographic_location: Option<String>,
    #[serde(default)]
    pub is_synthetic: bool,
}

impl PatientSpec {
    /// Validated patient code
    pub fn code(&self) -> Result<PatientCode> {
        PatientCode::new(self.patient_code.as_str()).map_err(WarehouseError::Resolution)
    }
}

/// Facility reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitySpec {
    /// Natural code; derived from the name when absent
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub facility_type: Option<String>,
}

impl FacilitySpec {
    /// Natural code of the facility
    ///
    /// # Errors
    ///
    /// Returns a `Resolution` error when neither a code nor a name is present.
    pub fn natural_code(&self) -> Result<String> {
        let code = match self.code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => normalize_code(&self.name),
        };
        if code.is_empty() {
            return Err(WarehouseError::Resolution(
                "facility has neither a code nor a name".to_string(),
            ));
        }
        check_width("facility code", &code, MAX_CODE_LEN).map_err(WarehouseError::Resolution)?;
        Ok(code)
    }
}

/// Encounter with its procedures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterSpec {
    pub encounter_code: String,
    pub encounter_at: DateTime<Utc>,
    #[serde(default)]
    pub referring_physician: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub procedures: Vec<ProcedureSpec>,
}

impl EncounterSpec {
    /// Validated encounter code
    pub fn code(&self) -> Result<EncounterCode> {
        EncounterCode::new(self.encounter_code.as_str()).map_err(WarehouseError::Resolution)
    }
}

/// One imaging procedure and its artifact set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcedureSpec {
    pub modality_code: String,
    #[serde(default)]
    pub projection_code: Option<String>,
    #[serde(default)]
    pub region_code: Option<String>,
    #[serde(default)]
    pub procedure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub technician_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageSpec>,
    #[serde(default)]
    pub report: Option<ReportSpec>,
    #[serde(default)]
    pub findings: Vec<FindingSpec>,
    #[serde(default)]
    pub diagnoses: Vec<DiagnosisSpec>,
}

impl ProcedureSpec {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.modality_code.trim().is_empty() {
            return Err("modality code cannot be empty".to_string());
        }
        check_width("modality code", &self.modality_code, MAX_CODE_LEN)?;
        if let Some(code) = &self.projection_code {
            if code.trim().is_empty() {
                return Err("projection code cannot be blank".to_string());
            }
            check_width("projection code", code, MAX_CODE_LEN)?;
        }
        if let Some(code) = &self.region_code {
            check_width("region code", code, MAX_CODE_LEN)?;
        }
        if let Some(name) = &self.technician_name {
            check_width("technician name", name, MAX_NAME_LEN)?;
        }
        for image in &self.images {
            if image.image_code.trim().is_empty() {
                return Err("image code cannot be empty".to_string());
            }
            check_width("image code", &image.image_code, MAX_ENCOUNTER_CODE_LEN)?;
            check_width("image file name", image.filename(), MAX_NAME_LEN)?;
            if let Some(study) = &image.study_id {
                check_width("study id", study, MAX_ENCOUNTER_CODE_LEN)?;
            }
        }
        if let Some(report) = &self.report {
            for code in [&report.language_code, &report.audio_language_code]
                .into_iter()
                .flatten()
            {
                check_width("language code", code, MAX_CODE_LEN)?;
            }
            if let Some(reviewer) = &report.reviewed_by {
                check_width("reviewer", reviewer, MAX_NAME_LEN)?;
            }
        }
        for diagnosis in &self.diagnoses {
            if normalize_code(&diagnosis.name).is_empty() {
                return Err("diagnosis name cannot be empty".to_string());
            }
            check_width("diagnosis name", &diagnosis.name, MAX_NAME_LEN)?;
        }
        Ok(())
    }

    /// Diagnosis labels joined for keyword matching
    pub fn label_text(&self) -> String {
        self.diagnoses
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Image file reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub image_code: String,
    pub path: String,
    #[serde(default)]
    pub study_id: Option<String>,
}

impl ImageSpec {
    /// File name portion of the path
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(self.path.as_str())
    }
}

/// Clinical report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSpec {
    pub text: String,
    /// Language natural code; English when absent
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub has_audio: bool,
    /// Audio language natural code; English when audio is present and this is absent
    #[serde(default)]
    pub audio_language_code: Option<String>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Radiological finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingSpec {
    pub findings_text: String,
    #[serde(default)]
    pub impression_text: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Derived from the labels when absent
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Defaults to `severity != Normal`
    #[serde(default)]
    pub abnormality_detected: Option<bool>,
    pub confidence: f64,
}

/// Diagnosis attached to a procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisSpec {
    pub name: String,
    pub confidence: f64,
}

/// Rejects values wider than the column that stores them (trimmed, in characters)
fn check_width(field: &str, value: &str, max: usize) -> std::result::Result<(), String> {
    let width = value.trim().chars().count();
    if width > max {
        return Err(format!("{field} is {width} characters, limit is {max}"));
    }
    Ok(())
}

/// Natural code normalisation used for facility names and diagnosis labels
///
/// Spaces become underscores, the result is lower-cased and cut to 50 characters.
///
/// # Examples
///
/// ```
/// use imaging_warehouse::domain::records::normalize_code;
///
/// assert_eq!(normalize_code("Pleural Thickening"), "pleural_thickening");
/// assert_eq!(normalize_code("  "), "");
/// ```
pub fn normalize_code(name: &str) -> String {
    name.trim()
        .replace(' ', "_")
        .to_lowercase()
        .chars()
        .take(50)
        .collect()
}
