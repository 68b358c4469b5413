//! PostgreSQL row mapping
//!
//! Column lists and conversions between `tokio_postgres::Row` and domain rows.

use crate::core::state::watermark::{LoadStatus, Watermark};
use crate::domain::audit::{RunAuditRecord, RunMode, RunStatus};
use crate::domain::ids::{
    ArtifactId, EncounterCode, EncounterId, PatientCode, PatientId, ProcedureId, ReferenceId,
};
use crate::domain::operational::{
    DiagnosisLinkRow, EncounterRow, FindingRow, ImageRow, PatientRow, ProcedureRow, ReportRow,
    Severity,
};
use crate::domain::reference::{DisplayFields, EntityType, ReferenceEntity};
use crate::domain::{Result, WarehouseError};
use chrono::{DateTime, Utc};
use tokio_postgres::types::FromSql;
use tokio_postgres::Row;
use uuid::Uuid;

pub(crate) const REFERENCE_COLUMNS: &str =
    "id, code, name, attributes, is_active, created_at, updated_at";

pub(crate) const PATIENT_COLUMNS: &str = "id, patient_code, sex, date_of_birth, reported_age, \
     height_cm, weight_kg, geographic_location, is_synthetic, first_encounter_date, \
     last_encounter_date, total_encounters, created_at, updated_at";

pub(crate) const ENCOUNTER_COLUMNS: &str = "id, encounter_code, patient_id, facility_id, \
     encounter_at, referring_physician, notes, is_active, created_at, updated_at";

pub(crate) const PROCEDURE_COLUMNS: &str = "id, procedure_code, encounter_id, modality_id, \
     projection_id, region_id, procedure_at, technician_name, notes, created_at, updated_at";

pub(crate) const IMAGE_COLUMNS: &str =
    "id, procedure_id, image_code, filename, path, study_id, created_at";

pub(crate) const REPORT_COLUMNS: &str = "id, procedure_id, language_id, report_text, \
     report_type, word_count, summary, has_audio, audio_language_id, reviewed_by, reviewed_at, \
     created_at";

pub(crate) const FINDING_COLUMNS: &str = "id, procedure_id, findings_text, impression_text, \
     finding_severity, abnormality_detected, confidence_score, created_at";

pub(crate) const LINK_COLUMNS: &str = "id, procedure_id, diagnosis_id, diagnosis_sequence, \
     is_primary, confidence_score, is_active, created_at";

pub(crate) const RUN_COLUMNS: &str = "run_id, pipeline_name, mode, started_at, finished_at, \
     duration_ms, rows_loaded, rows_failed, status, error_message";

/// Tables reported by `status`, in display order
pub(crate) const COUNTED_TABLES: [&str; 13] = [
    "operational.patients",
    "operational.encounters",
    "operational.procedures",
    "operational.radiological_images",
    "operational.clinical_reports",
    "operational.findings",
    "operational.procedure_diagnosis",
    "analytics.dim_patient",
    "analytics.dim_facility",
    "analytics.dim_modality",
    "analytics.dim_diagnosis",
    "analytics.fact_procedure",
    "analytics.fact_language_usage",
];

/// Typed column read; a decoding failure is a serialization error, not a panic
fn get<'a, T: FromSql<'a>>(row: &'a Row, column: &str) -> Result<T> {
    row.try_get(column).map_err(|e| {
        WarehouseError::Serialization(format!("Failed to read column '{column}': {e}"))
    })
}

fn code<T>(value: String, parse: fn(String) -> std::result::Result<T, String>) -> Result<T> {
    parse(value).map_err(WarehouseError::Serialization)
}

pub(crate) fn reference_from_row(entity: EntityType, row: &Row) -> Result<ReferenceEntity> {
    Ok(ReferenceEntity {
        id: ReferenceId::from_uuid(get(row, "id")?),
        entity_type: entity,
        code: get(row, "code")?,
        display: DisplayFields {
            name: get(row, "name")?,
            attributes: get(row, "attributes")?,
        },
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn patient_from_row(row: &Row) -> Result<PatientRow> {
    Ok(PatientRow {
        id: PatientId::from_uuid(get(row, "id")?),
        patient_code: code(get(row, "patient_code")?, |s| PatientCode::new(s))?,
        sex: get(row, "sex")?,
        date_of_birth: get(row, "date_of_birth")?,
        reported_age: get(row, "reported_age")?,
        height_cm: get(row, "height_cm")?,
        weight_kg: get(row, "weight_kg")?,
        geographic_location: get(row, "geographic_location")?,
        is_synthetic: get(row, "is_synthetic")?,
        first_encounter_date: get(row, "first_encounter_date")?,
        last_encounter_date: get(row, "last_encounter_date")?,
        total_encounters: get(row, "total_encounters")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn encounter_from_row(row: &Row) -> Result<EncounterRow> {
    Ok(EncounterRow {
        id: EncounterId::from_uuid(get(row, "id")?),
        encounter_code: code(get(row, "encounter_code")?, |s| EncounterCode::new(s))?,
        patient_id: PatientId::from_uuid(get(row, "patient_id")?),
        facility_id: ReferenceId::from_uuid(get(row, "facility_id")?),
        encounter_at: get(row, "encounter_at")?,
        referring_physician: get(row, "referring_physician")?,
        notes: get(row, "notes")?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn procedure_from_row(row: &Row) -> Result<ProcedureRow> {
    let projection: Option<Uuid> = get(row, "projection_id")?;
    let region: Option<Uuid> = get(row, "region_id")?;
    Ok(ProcedureRow {
        id: ProcedureId::from_uuid(get(row, "id")?),
        procedure_code: get(row, "procedure_code")?,
        encounter_id: EncounterId::from_uuid(get(row, "encounter_id")?),
        modality_id: ReferenceId::from_uuid(get(row, "modality_id")?),
        projection_id: projection.map(ReferenceId::from_uuid),
        region_id: region.map(ReferenceId::from_uuid),
        procedure_at: get(row, "procedure_at")?,
        technician_name: get(row, "technician_name")?,
        notes: get(row, "notes")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn image_from_row(row: &Row) -> Result<ImageRow> {
    Ok(ImageRow {
        id: ArtifactId::from_uuid(get(row, "id")?),
        procedure_id: ProcedureId::from_uuid(get(row, "procedure_id")?),
        image_code: get(row, "image_code")?,
        filename: get(row, "filename")?,
        path: get(row, "path")?,
        study_id: get(row, "study_id")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn report_from_row(row: &Row) -> Result<ReportRow> {
    let audio: Option<Uuid> = get(row, "audio_language_id")?;
    Ok(ReportRow {
        id: ArtifactId::from_uuid(get(row, "id")?),
        procedure_id: ProcedureId::from_uuid(get(row, "procedure_id")?),
        language_id: ReferenceId::from_uuid(get(row, "language_id")?),
        text: get(row, "report_text")?,
        report_type: get(row, "report_type")?,
        word_count: get(row, "word_count")?,
        summary: get(row, "summary")?,
        has_audio: get(row, "has_audio")?,
        audio_language_id: audio.map(ReferenceId::from_uuid),
        reviewed_by: get(row, "reviewed_by")?,
        reviewed_at: get(row, "reviewed_at")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn finding_from_row(row: &Row) -> Result<FindingRow> {
    let severity: String = get(row, "finding_severity")?;
    Ok(FindingRow {
        id: ArtifactId::from_uuid(get(row, "id")?),
        procedure_id: ProcedureId::from_uuid(get(row, "procedure_id")?),
        findings_text: get(row, "findings_text")?,
        impression_text: get(row, "impression_text")?,
        severity: severity.parse::<Severity>()?,
        abnormality_detected: get(row, "abnormality_detected")?,
        confidence: get(row, "confidence_score")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn link_from_row(row: &Row) -> Result<DiagnosisLinkRow> {
    Ok(DiagnosisLinkRow {
        id: ArtifactId::from_uuid(get(row, "id")?),
        procedure_id: ProcedureId::from_uuid(get(row, "procedure_id")?),
        diagnosis_id: ReferenceId::from_uuid(get(row, "diagnosis_id")?),
        sequence: get(row, "diagnosis_sequence")?,
        is_primary: get(row, "is_primary")?,
        confidence: get(row, "confidence_score")?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn run_from_row(row: &Row) -> Result<RunAuditRecord> {
    let mode: String = get(row, "mode")?;
    let status: String = get(row, "status")?;
    Ok(RunAuditRecord {
        run_id: get(row, "run_id")?,
        pipeline_name: get(row, "pipeline_name")?,
        mode: mode.parse::<RunMode>()?,
        started_at: get(row, "started_at")?,
        finished_at: get(row, "finished_at")?,
        duration_ms: get(row, "duration_ms")?,
        rows_loaded: get(row, "rows_loaded")?,
        rows_failed: get(row, "rows_failed")?,
        status: status.parse::<RunStatus>()?,
        error_message: get(row, "error_message")?,
    })
}

/// PostgreSQL representation of a [`Watermark`]
///
/// Counters are stored as `BIGINT` and pending procedures as a JSONB array.
#[derive(Debug, Clone)]
pub struct PostgreSQLWatermark {
    pub pipeline_name: String,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub pending_procedures: serde_json::Value,
    pub total_rows_loaded: i64,
    pub total_rows_failed: i64,
    pub last_run_id: Option<Uuid>,
    pub last_run_started_at: DateTime<Utc>,
    pub last_run_completed_at: Option<DateTime<Utc>>,
    pub last_run_status: String,
}

impl PostgreSQLWatermark {
    /// Convert from the domain watermark
    ///
    /// # Errors
    ///
    /// Returns a `Serialization` error if the pending list cannot be encoded.
    pub fn from_domain(watermark: &Watermark) -> Result<Self> {
        Ok(Self {
            pipeline_name: watermark.pipeline_name.clone(),
            last_checkpoint: watermark.last_checkpoint,
            pending_procedures: serde_json::to_value(&watermark.pending_procedures)
                .map_err(|e| WarehouseError::Serialization(e.to_string()))?,
            total_rows_loaded: i64::try_from(watermark.total_rows_loaded).unwrap_or(i64::MAX),
            total_rows_failed: i64::try_from(watermark.total_rows_failed).unwrap_or(i64::MAX),
            last_run_id: watermark.last_run_id,
            last_run_started_at: watermark.last_run_started_at,
            last_run_completed_at: watermark.last_run_completed_at,
            last_run_status: watermark.last_run_status.as_str().to_string(),
        })
    }

    /// Read from an `audit.watermarks` row
    ///
    /// # Errors
    ///
    /// Returns a `Serialization` error if a column has an unexpected type.
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            pipeline_name: get(row, "pipeline_name")?,
            last_checkpoint: get(row, "last_checkpoint")?,
            pending_procedures: get(row, "pending_procedures")?,
            total_rows_loaded: get(row, "total_rows_loaded")?,
            total_rows_failed: get(row, "total_rows_failed")?,
            last_run_id: get(row, "last_run_id")?,
            last_run_started_at: get(row, "last_run_started_at")?,
            last_run_completed_at: get(row, "last_run_completed_at")?,
            last_run_status: get(row, "last_run_status")?,
        })
    }

    /// Convert to the domain watermark
    ///
    /// # Errors
    ///
    /// Returns a `State` error on an unknown status or malformed pending list.
    pub fn to_domain(&self) -> Result<Watermark> {
        let pending: Vec<ProcedureId> = serde_json::from_value(self.pending_procedures.clone())
            .map_err(|e| WarehouseError::State(format!("Malformed pending procedures: {e}")))?;

        Ok(Watermark {
            pipeline_name: self.pipeline_name.clone(),
            last_checkpoint: self.last_checkpoint,
            pending_procedures: pending,
            total_rows_loaded: u64::try_from(self.total_rows_loaded).unwrap_or(0),
            total_rows_failed: u64::try_from(self.total_rows_failed).unwrap_or(0),
            last_run_id: self.last_run_id,
            last_run_started_at: self.last_run_started_at,
            last_run_completed_at: self.last_run_completed_at,
            last_run_status: parse_load_status(&self.last_run_status)?,
        })
    }
}

fn parse_load_status(value: &str) -> Result<LoadStatus> {
    match value {
        "in_progress" => Ok(LoadStatus::InProgress),
        "completed" => Ok(LoadStatus::Completed),
        "failed" => Ok(LoadStatus::Failed),
        "not_started" => Ok(LoadStatus::NotStarted),
        other => Err(WarehouseError::State(format!("Unknown load status '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_conversion_keeps_pending() {
        let pending = vec![ProcedureId::generate(), ProcedureId::generate()];
        let mut watermark = Watermark::new("imaging_warehouse_load");
        watermark.total_rows_loaded = 42;
        watermark.pending_procedures = pending.clone();
        watermark.mark_completed();

        let pg = PostgreSQLWatermark::from_domain(&watermark).unwrap();
        assert_eq!(pg.total_rows_loaded, 42);
        assert_eq!(pg.last_run_status, "completed");

        let back = pg.to_domain().unwrap();
        assert_eq!(back.pending_procedures, pending);
        assert_eq!(back.last_run_status, LoadStatus::Completed);
    }

    #[test]
    fn test_unknown_status_is_state_error() {
        assert!(matches!(
            parse_load_status("paused"),
            Err(WarehouseError::State(_))
        ));
    }

    #[test]
    fn test_counted_tables_are_qualified() {
        assert!(COUNTED_TABLES.iter().all(|t| t.contains('.')));
    }
}
