//! PostgreSQL unit of work
//!
//! A [`PgTransaction`] pins one pooled connection between `BEGIN` and
//! `COMMIT`/`ROLLBACK`. Statements are prepared through the per-connection
//! statement cache.

use crate::adapters::database::traits::{IntegrityCheck, RegistryInsert, WarehouseTransaction};
use crate::adapters::postgresql::errors::map_pg_error;
use crate::adapters::postgresql::models::{
    encounter_from_row, finding_from_row, image_from_row, link_from_row, patient_from_row,
    procedure_from_row, reference_from_row, report_from_row, run_from_row, COUNTED_TABLES,
    ENCOUNTER_COLUMNS, FINDING_COLUMNS, IMAGE_COLUMNS, LINK_COLUMNS, PATIENT_COLUMNS,
    PROCEDURE_COLUMNS, REFERENCE_COLUMNS, REPORT_COLUMNS, RUN_COLUMNS,
};
use crate::domain::analytics::{DimensionRow, FactLanguageUsage, FactProcedure};
use crate::domain::audit::{AuditEntry, QualityIssue, RunAuditRecord, TableCount};
use crate::domain::ids::{
    EncounterId, InternalId, KeyKind, PatientCode, PatientId, ProcedureId, ReferenceId,
    SurrogateKey,
};
use crate::domain::operational::{
    DiagnosisLinkRow, EncounterRow, FindingRow, ImageRow, PatientRow, ProcedureGraph,
    ProcedureRow, ReportRow,
};
use crate::domain::reference::{DisplayFields, EntityType, ReferenceEntity};
use crate::domain::{Result, WarehouseError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::Object;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use uuid::Uuid;

type Params<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Open transaction on a pooled connection
///
/// Dropped without commit or rollback, the connection is detached from the
/// pool and closed so the server discards the open transaction.
pub struct PgTransaction {
    conn: Option<Object>,
    finished: bool,
}

impl PgTransaction {
    /// Issue `BEGIN` and apply the statement timeout
    pub(crate) async fn begin(conn: Object, statement_timeout_ms: u64) -> Result<Self> {
        conn.batch_execute(&format!(
            "BEGIN; SET LOCAL statement_timeout = {statement_timeout_ms}"
        ))
        .await
        .map_err(|e| map_pg_error(&e, "Failed to begin transaction"))?;

        Ok(Self {
            conn: Some(conn),
            finished: false,
        })
    }

    fn conn(&self) -> Result<&Object> {
        self.conn
            .as_ref()
            .ok_or_else(|| WarehouseError::Systemic("Transaction already finished".to_string()))
    }

    async fn query(&self, what: &str, sql: &str, params: Params<'_>) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare_cached(sql)
            .await
            .map_err(|e| map_pg_error(&e, what))?;
        conn.query(&stmt, params)
            .await
            .map_err(|e| map_pg_error(&e, what))
    }

    async fn query_opt(&self, what: &str, sql: &str, params: Params<'_>) -> Result<Option<Row>> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare_cached(sql)
            .await
            .map_err(|e| map_pg_error(&e, what))?;
        conn.query_opt(&stmt, params)
            .await
            .map_err(|e| map_pg_error(&e, what))
    }

    async fn execute(&self, what: &str, sql: &str, params: Params<'_>) -> Result<u64> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare_cached(sql)
            .await
            .map_err(|e| map_pg_error(&e, what))?;
        conn.execute(&stmt, params)
            .await
            .map_err(|e| map_pg_error(&e, what))
    }

    async fn count(&self, what: &str, sql: &str) -> Result<u64> {
        let row = self
            .query_opt(what, sql, &[])
            .await?
            .ok_or_else(|| WarehouseError::Database(format!("{what}: no result row")))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| WarehouseError::Serialization(format!("{what}: {e}")))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn finish(&mut self, statement: &str) -> Result<()> {
        self.conn()?
            .batch_execute(statement)
            .await
            .map_err(|e| map_pg_error(&e, statement))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Discarding connection with an unfinished transaction");
            drop(Object::take(conn));
        }
    }
}

fn violation_sql(check: IntegrityCheck) -> &'static str {
    match check {
        IntegrityCheck::OrphanFactDimensions => {
            "SELECT
                (SELECT COUNT(*) FROM analytics.fact_procedure f
                   LEFT JOIN analytics.dim_patient p ON p.patient_sk = f.patient_sk
                   LEFT JOIN analytics.dim_facility fa ON fa.facility_sk = f.facility_sk
                   LEFT JOIN analytics.dim_modality m ON m.modality_sk = f.modality_sk
                   LEFT JOIN analytics.dim_date d ON d.date_key = f.date_key
                   LEFT JOIN analytics.dim_diagnosis dg ON dg.diagnosis_sk = f.diagnosis_sk
                  WHERE p.patient_sk IS NULL OR fa.facility_sk IS NULL
                     OR m.modality_sk IS NULL OR d.date_key IS NULL
                     OR (f.diagnosis_sk IS NOT NULL AND dg.diagnosis_sk IS NULL))
              + (SELECT COUNT(*) FROM analytics.fact_language_usage l
                   LEFT JOIN analytics.dim_patient p ON p.patient_sk = l.patient_sk
                   LEFT JOIN analytics.dim_facility fa ON fa.facility_sk = l.facility_sk
                   LEFT JOIN analytics.dim_date d ON d.date_key = l.date_key
                  WHERE p.patient_sk IS NULL OR fa.facility_sk IS NULL OR d.date_key IS NULL)"
        }
        IntegrityCheck::FactsWithoutProcedure => {
            "SELECT COUNT(*) FROM analytics.fact_procedure f
              WHERE NOT EXISTS (SELECT 1 FROM operational.procedures p WHERE p.id = f.procedure_id)"
        }
        IntegrityCheck::DuplicateProcedureFacts => {
            "SELECT COUNT(*) - COUNT(DISTINCT procedure_id) FROM analytics.fact_procedure"
        }
        IntegrityCheck::DiagnosisCountMismatch => {
            "SELECT COUNT(*) FROM analytics.fact_procedure f
              WHERE f.diagnosis_count <> (
                    SELECT COUNT(*) FROM operational.procedure_diagnosis pd
                     WHERE pd.procedure_id = f.procedure_id AND pd.is_active)"
        }
        IntegrityCheck::ConfidenceOutOfRange => {
            "SELECT
                (SELECT COUNT(*) FROM operational.findings
                  WHERE confidence_score < 0 OR confidence_score > 1)
              + (SELECT COUNT(*) FROM operational.procedure_diagnosis
                  WHERE confidence_score < 0 OR confidence_score > 1)"
        }
        IntegrityCheck::QualityScoreOutOfRange => {
            "SELECT COUNT(*) FROM analytics.fact_procedure
              WHERE quality_score < 0 OR quality_score > 1"
        }
        IntegrityCheck::NegativeMeasures => {
            "SELECT
                (SELECT COUNT(*) FROM analytics.fact_procedure
                  WHERE diagnosis_count < 0 OR total_images < 0 OR report_word_count < 0)
              + (SELECT COUNT(*) FROM analytics.fact_language_usage WHERE word_count < 0)
              + (SELECT COUNT(*) FROM operational.patients WHERE total_encounters < 0)"
        }
        IntegrityCheck::ReportsWithoutLanguage => {
            "SELECT COUNT(*) FROM operational.clinical_reports r
               LEFT JOIN master.language_registry l ON l.id = r.language_id
              WHERE l.id IS NULL"
        }
    }
}

fn group_by_procedure<T>(
    rows: Vec<Row>,
    map: fn(&Row) -> Result<T>,
    procedure_of: fn(&T) -> Uuid,
) -> Result<HashMap<Uuid, Vec<T>>> {
    let mut grouped: HashMap<Uuid, Vec<T>> = HashMap::new();
    for row in &rows {
        let item = map(row)?;
        grouped.entry(procedure_of(&item)).or_default().push(item);
    }
    Ok(grouped)
}

#[async_trait]
impl WarehouseTransaction for PgTransaction {
    async fn find_reference(
        &mut self,
        entity: EntityType,
        code: &str,
    ) -> Result<Option<ReferenceEntity>> {
        let sql = format!(
            "SELECT {REFERENCE_COLUMNS} FROM {} WHERE code = $1",
            entity.table_name()
        );
        self.query_opt("find reference", &sql, &[&code])
            .await?
            .map(|row| reference_from_row(entity, &row))
            .transpose()
    }

    async fn get_reference(
        &mut self,
        entity: EntityType,
        id: &ReferenceId,
    ) -> Result<Option<ReferenceEntity>> {
        let sql = format!(
            "SELECT {REFERENCE_COLUMNS} FROM {} WHERE id = $1",
            entity.table_name()
        );
        self.query_opt("get reference", &sql, &[id.as_uuid()])
            .await?
            .map(|row| reference_from_row(entity, &row))
            .transpose()
    }

    async fn insert_reference_if_absent(
        &mut self,
        entity: EntityType,
        code: &str,
        display: &DisplayFields,
        candidate_id: &ReferenceId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} (id, code, name, attributes, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, TRUE, $5, $5)
             ON CONFLICT (code) DO NOTHING",
            entity.table_name()
        );
        let inserted = self
            .execute(
                "insert reference",
                &sql,
                &[
                    candidate_id.as_uuid(),
                    &code,
                    &display.name,
                    &display.attributes,
                    &now,
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn reference_changes(
        &mut self,
        entity: EntityType,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReferenceEntity>> {
        let sql = format!(
            "SELECT {REFERENCE_COLUMNS} FROM {}
              WHERE ($1::timestamptz IS NULL OR updated_at >= $1)
              ORDER BY code",
            entity.table_name()
        );
        self.query("reference changes", &sql, &[&since])
            .await?
            .iter()
            .map(|row| reference_from_row(entity, row))
            .collect()
    }

    async fn registry_get(
        &mut self,
        kind: KeyKind,
        natural_key: &str,
    ) -> Result<Option<InternalId>> {
        let row = self
            .query_opt(
                "registry lookup",
                "SELECT internal_id FROM audit.natural_key_registry
                  WHERE key_kind = $1 AND natural_key = $2",
                &[&kind.as_str(), &natural_key],
            )
            .await?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("internal_id")
                    .map_err(|e| WarehouseError::Serialization(e.to_string()))?;
                raw.parse::<InternalId>()
                    .map(Some)
                    .map_err(WarehouseError::Serialization)
            }
            None => Ok(None),
        }
    }

    async fn registry_insert_if_absent(
        &mut self,
        kind: KeyKind,
        natural_key: &str,
        internal_id: &InternalId,
    ) -> Result<RegistryInsert> {
        let inserted = self
            .execute(
                "registry insert",
                "INSERT INTO audit.natural_key_registry (key_kind, natural_key, internal_id)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (key_kind, natural_key) DO NOTHING",
                &[&kind.as_str(), &natural_key, &internal_id.to_string()],
            )
            .await?;

        if inserted > 0 {
            return Ok(RegistryInsert::Inserted);
        }

        match self.registry_get(kind, natural_key).await? {
            Some(existing) => Ok(RegistryInsert::Existing(existing)),
            None => Err(WarehouseError::Integrity(format!(
                "Registry entry {kind}/{natural_key} vanished after conflict"
            ))),
        }
    }

    async fn find_patient(&mut self, code: &PatientCode) -> Result<Option<PatientRow>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM operational.patients WHERE patient_code = $1");
        self.query_opt("find patient", &sql, &[&code.as_str()])
            .await?
            .map(|row| patient_from_row(&row))
            .transpose()
    }

    async fn get_patient(&mut self, id: &PatientId) -> Result<Option<PatientRow>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM operational.patients WHERE id = $1");
        self.query_opt("get patient", &sql, &[id.as_uuid()])
            .await?
            .map(|row| patient_from_row(&row))
            .transpose()
    }

    async fn insert_patient_if_absent(&mut self, patient: &PatientRow) -> Result<bool> {
        let inserted = self
            .execute(
                "insert patient",
                "INSERT INTO operational.patients (
                    id, patient_code, sex, date_of_birth, reported_age, height_cm, weight_kg,
                    geographic_location, is_synthetic, first_encounter_date, last_encounter_date,
                    total_encounters, created_at, updated_at
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                 ON CONFLICT (patient_code) DO NOTHING",
                &[
                    patient.id.as_uuid(),
                    &patient.patient_code.as_str(),
                    &patient.sex,
                    &patient.date_of_birth,
                    &patient.reported_age,
                    &patient.height_cm,
                    &patient.weight_kg,
                    &patient.geographic_location,
                    &patient.is_synthetic,
                    &patient.first_encounter_date,
                    &patient.last_encounter_date,
                    &patient.total_encounters,
                    &patient.created_at,
                    &patient.updated_at,
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn apply_encounter_rollup(
        &mut self,
        patient_id: &PatientId,
        encounter_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<PatientRow> {
        let sql = format!(
            "UPDATE operational.patients
                SET total_encounters = total_encounters + 1,
                    first_encounter_date = LEAST(first_encounter_date, $2),
                    last_encounter_date = GREATEST(last_encounter_date, $2),
                    updated_at = $3
              WHERE id = $1
          RETURNING {PATIENT_COLUMNS}"
        );
        let row = self
            .query_opt(
                "patient rollup",
                &sql,
                &[patient_id.as_uuid(), &encounter_date, &now],
            )
            .await?
            .ok_or_else(|| {
                WarehouseError::Integrity(format!("Patient {patient_id} does not exist"))
            })?;
        patient_from_row(&row)
    }

    async fn get_encounter(&mut self, id: &EncounterId) -> Result<Option<EncounterRow>> {
        let sql = format!("SELECT {ENCOUNTER_COLUMNS} FROM operational.encounters WHERE id = $1");
        self.query_opt("get encounter", &sql, &[id.as_uuid()])
            .await?
            .map(|row| encounter_from_row(&row))
            .transpose()
    }

    async fn insert_encounter(&mut self, encounter: &EncounterRow) -> Result<()> {
        self.execute(
            "insert encounter",
            "INSERT INTO operational.encounters (
                id, encounter_code, patient_id, facility_id, encounter_at, referring_physician,
                notes, is_active, created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                encounter.id.as_uuid(),
                &encounter.encounter_code.as_str(),
                encounter.patient_id.as_uuid(),
                encounter.facility_id.as_uuid(),
                &encounter.encounter_at,
                &encounter.referring_physician,
                &encounter.notes,
                &encounter.is_active,
                &encounter.created_at,
                &encounter.updated_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_procedure(&mut self, procedure: &ProcedureRow) -> Result<()> {
        let projection = procedure.projection_id.map(|id| *id.as_uuid());
        let region = procedure.region_id.map(|id| *id.as_uuid());
        self.execute(
            "insert procedure",
            "INSERT INTO operational.procedures (
                id, procedure_code, encounter_id, modality_id, projection_id, region_id,
                procedure_at, technician_name, notes, created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                procedure.id.as_uuid(),
                &procedure.procedure_code,
                procedure.encounter_id.as_uuid(),
                procedure.modality_id.as_uuid(),
                &projection,
                &region,
                &procedure.procedure_at,
                &procedure.technician_name,
                &procedure.notes,
                &procedure.created_at,
                &procedure.updated_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_image(&mut self, image: &ImageRow) -> Result<()> {
        self.execute(
            "insert image",
            "INSERT INTO operational.radiological_images (
                id, procedure_id, image_code, filename, path, study_id, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                image.id.as_uuid(),
                image.procedure_id.as_uuid(),
                &image.image_code,
                &image.filename,
                &image.path,
                &image.study_id,
                &image.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_report(&mut self, report: &ReportRow) -> Result<()> {
        let audio_language = report.audio_language_id.map(|id| *id.as_uuid());
        self.execute(
            "insert report",
            "INSERT INTO operational.clinical_reports (
                id, procedure_id, language_id, report_text, report_type, word_count, summary,
                has_audio, audio_language_id, reviewed_by, reviewed_at, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            &[
                report.id.as_uuid(),
                report.procedure_id.as_uuid(),
                report.language_id.as_uuid(),
                &report.text,
                &report.report_type,
                &report.word_count,
                &report.summary,
                &report.has_audio,
                &audio_language,
                &report.reviewed_by,
                &report.reviewed_at,
                &report.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_finding(&mut self, finding: &FindingRow) -> Result<()> {
        self.execute(
            "insert finding",
            "INSERT INTO operational.findings (
                id, procedure_id, findings_text, impression_text, finding_severity,
                abnormality_detected, confidence_score, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                finding.id.as_uuid(),
                finding.procedure_id.as_uuid(),
                &finding.findings_text,
                &finding.impression_text,
                &finding.severity.as_str(),
                &finding.abnormality_detected,
                &finding.confidence,
                &finding.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_diagnosis_link(&mut self, link: &DiagnosisLinkRow) -> Result<()> {
        self.execute(
            "insert diagnosis link",
            "INSERT INTO operational.procedure_diagnosis (
                id, procedure_id, diagnosis_id, diagnosis_sequence, is_primary,
                confidence_score, is_active, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                link.id.as_uuid(),
                link.procedure_id.as_uuid(),
                link.diagnosis_id.as_uuid(),
                &link.sequence,
                &link.is_primary,
                &link.confidence,
                &link.is_active,
                &link.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn changed_patients(&mut self, since: Option<DateTime<Utc>>) -> Result<Vec<PatientRow>> {
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM operational.patients
              WHERE ($1::timestamptz IS NULL OR updated_at >= $1)
              ORDER BY patient_code"
        );
        self.query("changed patients", &sql, &[&since])
            .await?
            .iter()
            .map(patient_from_row)
            .collect()
    }

    async fn changed_procedures(
        &mut self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProcedureId>> {
        let rows = self
            .query(
                "changed procedures",
                "SELECT id FROM operational.procedures
                  WHERE ($1::timestamptz IS NULL OR updated_at >= $1)
                  ORDER BY procedure_code",
                &[&since],
            )
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, Uuid>("id")
                    .map(ProcedureId::from_uuid)
                    .map_err(|e| WarehouseError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn load_procedure_graphs(&mut self, ids: &[ProcedureId]) -> Result<Vec<ProcedureGraph>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let procedure_ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let sql = format!("SELECT {PROCEDURE_COLUMNS} FROM operational.procedures WHERE id = ANY($1)");
        let procedures: HashMap<Uuid, ProcedureRow> = self
            .query("load procedures", &sql, &[&procedure_ids])
            .await?
            .iter()
            .map(|row| procedure_from_row(row).map(|p| (*p.id.as_uuid(), p)))
            .collect::<Result<_>>()?;

        let encounter_ids: Vec<Uuid> = procedures
            .values()
            .map(|p| *p.encounter_id.as_uuid())
            .collect();
        let sql = format!("SELECT {ENCOUNTER_COLUMNS} FROM operational.encounters WHERE id = ANY($1)");
        let encounters: HashMap<Uuid, EncounterRow> = self
            .query("load encounters", &sql, &[&encounter_ids])
            .await?
            .iter()
            .map(|row| encounter_from_row(row).map(|e| (*e.id.as_uuid(), e)))
            .collect::<Result<_>>()?;

        let patient_ids: Vec<Uuid> = encounters
            .values()
            .map(|e| *e.patient_id.as_uuid())
            .collect();
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM operational.patients WHERE id = ANY($1)");
        let patients: HashMap<Uuid, PatientRow> = self
            .query("load patients", &sql, &[&patient_ids])
            .await?
            .iter()
            .map(|row| patient_from_row(row).map(|p| (*p.id.as_uuid(), p)))
            .collect::<Result<_>>()?;

        let sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM operational.radiological_images
              WHERE procedure_id = ANY($1) ORDER BY image_code"
        );
        let rows = self.query("load images", &sql, &[&procedure_ids]).await?;
        let mut images = group_by_procedure(rows, image_from_row, |i| *i.procedure_id.as_uuid())?;

        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM operational.clinical_reports
              WHERE procedure_id = ANY($1) ORDER BY created_at"
        );
        let rows = self.query("load reports", &sql, &[&procedure_ids]).await?;
        let mut reports = group_by_procedure(rows, report_from_row, |r| *r.procedure_id.as_uuid())?;

        let sql = format!(
            "SELECT {FINDING_COLUMNS} FROM operational.findings
              WHERE procedure_id = ANY($1) ORDER BY created_at"
        );
        let rows = self.query("load findings", &sql, &[&procedure_ids]).await?;
        let mut findings =
            group_by_procedure(rows, finding_from_row, |f| *f.procedure_id.as_uuid())?;

        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM operational.procedure_diagnosis
              WHERE procedure_id = ANY($1) ORDER BY diagnosis_sequence"
        );
        let rows = self.query("load diagnosis links", &sql, &[&procedure_ids]).await?;
        let mut links = group_by_procedure(rows, link_from_row, |l| *l.procedure_id.as_uuid())?;

        let mut graphs = Vec::with_capacity(ids.len());
        for id in &procedure_ids {
            let Some(procedure) = procedures.get(id) else {
                continue;
            };
            let encounter = encounters
                .get(procedure.encounter_id.as_uuid())
                .ok_or_else(|| {
                    WarehouseError::Integrity(format!(
                        "Procedure {} has no encounter",
                        procedure.procedure_code
                    ))
                })?;
            let patient = patients.get(encounter.patient_id.as_uuid()).ok_or_else(|| {
                WarehouseError::Integrity(format!(
                    "Encounter {} has no patient",
                    encounter.encounter_code
                ))
            })?;

            graphs.push(ProcedureGraph {
                procedure: procedure.clone(),
                encounter: encounter.clone(),
                patient: patient.clone(),
                images: images.remove(id).unwrap_or_default(),
                reports: reports.remove(id).unwrap_or_default(),
                findings: findings.remove(id).unwrap_or_default(),
                links: links.remove(id).unwrap_or_default(),
            });
        }
        Ok(graphs)
    }

    async fn upsert_dimension(&mut self, row: &DimensionRow) -> Result<SurrogateKey> {
        let returned = match row {
            DimensionRow::Patient(dim) => {
                self.query_opt(
                    "upsert dim_patient",
                    "INSERT INTO analytics.dim_patient (
                        patient_code, patient_id, sex, date_of_birth, geographic_location,
                        first_encounter_date, last_encounter_date, total_encounters, is_synthetic,
                        updated_at
                     ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
                     ON CONFLICT (patient_code) DO UPDATE SET
                        patient_id = EXCLUDED.patient_id,
                        sex = EXCLUDED.sex,
                        date_of_birth = EXCLUDED.date_of_birth,
                        geographic_location = EXCLUDED.geographic_location,
                        first_encounter_date = EXCLUDED.first_encounter_date,
                        last_encounter_date = EXCLUDED.last_encounter_date,
                        total_encounters = EXCLUDED.total_encounters,
                        is_synthetic = EXCLUDED.is_synthetic,
                        updated_at = NOW()
                     RETURNING patient_sk",
                    &[
                        &dim.patient_code.as_str(),
                        dim.patient_id.as_uuid(),
                        &dim.sex,
                        &dim.date_of_birth,
                        &dim.geographic_location,
                        &dim.first_encounter_date,
                        &dim.last_encounter_date,
                        &dim.total_encounters,
                        &dim.is_synthetic,
                    ],
                )
                .await?
            }
            DimensionRow::Facility(dim) => {
                self.query_opt(
                    "upsert dim_facility",
                    "INSERT INTO analytics.dim_facility (
                        facility_id, facility_code, facility_name, location, facility_type, updated_at
                     ) VALUES ($1, $2, $3, $4, $5, NOW())
                     ON CONFLICT (facility_id) DO UPDATE SET
                        facility_code = EXCLUDED.facility_code,
                        facility_name = EXCLUDED.facility_name,
                        location = EXCLUDED.location,
                        facility_type = EXCLUDED.facility_type,
                        updated_at = NOW()
                     RETURNING facility_sk",
                    &[
                        dim.facility_id.as_uuid(),
                        &dim.facility_code,
                        &dim.facility_name,
                        &dim.location,
                        &dim.facility_type,
                    ],
                )
                .await?
            }
            DimensionRow::Modality(dim) => {
                self.query_opt(
                    "upsert dim_modality",
                    "INSERT INTO analytics.dim_modality (
                        modality_id, modality_code, modality_name, updated_at
                     ) VALUES ($1, $2, $3, NOW())
                     ON CONFLICT (modality_id) DO UPDATE SET
                        modality_code = EXCLUDED.modality_code,
                        modality_name = EXCLUDED.modality_name,
                        updated_at = NOW()
                     RETURNING modality_sk",
                    &[dim.modality_id.as_uuid(), &dim.modality_code, &dim.modality_name],
                )
                .await?
            }
            DimensionRow::Diagnosis(dim) => {
                self.query_opt(
                    "upsert dim_diagnosis",
                    "INSERT INTO analytics.dim_diagnosis (
                        diagnosis_id, diagnosis_code, diagnosis_name, category, updated_at
                     ) VALUES ($1, $2, $3, $4, NOW())
                     ON CONFLICT (diagnosis_id) DO UPDATE SET
                        diagnosis_code = EXCLUDED.diagnosis_code,
                        diagnosis_name = EXCLUDED.diagnosis_name,
                        category = EXCLUDED.category,
                        updated_at = NOW()
                     RETURNING diagnosis_sk",
                    &[
                        dim.diagnosis_id.as_uuid(),
                        &dim.diagnosis_code,
                        &dim.diagnosis_name,
                        &dim.category,
                    ],
                )
                .await?
            }
            DimensionRow::Date(dim) => {
                self.execute(
                    "upsert dim_date",
                    "INSERT INTO analytics.dim_date (
                        date_key, full_date, year, quarter, month, day, iso_weekday, is_weekend
                     ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (date_key) DO NOTHING",
                    &[
                        &dim.date_key,
                        &dim.full_date,
                        &dim.year,
                        &dim.quarter,
                        &dim.month,
                        &dim.day,
                        &dim.iso_weekday,
                        &dim.is_weekend,
                    ],
                )
                .await?;
                return Ok(SurrogateKey::new(i64::from(dim.date_key)));
            }
        };

        let row = returned.ok_or_else(|| {
            WarehouseError::Database(format!(
                "Upsert of {} '{}' returned no key",
                row.kind().table_name(),
                row.natural_ref()
            ))
        })?;
        let key: i64 = row
            .try_get(0)
            .map_err(|e| WarehouseError::Serialization(e.to_string()))?;
        Ok(SurrogateKey::new(key))
    }

    async fn upsert_procedure_fact(&mut self, fact: &FactProcedure) -> Result<()> {
        let diagnosis_sk = fact.diagnosis_sk.map(|sk| sk.value());
        let severity = fact.finding_severity.map(|s| s.as_str());
        self.execute(
            "upsert fact_procedure",
            "INSERT INTO analytics.fact_procedure (
                procedure_id, procedure_code, patient_sk, facility_sk, modality_sk, diagnosis_sk,
                date_key, projection_name, region_name, age_at_encounter, finding_severity,
                is_abnormal, diagnosis_count, total_images, report_word_count, quality_score,
                loaded_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             ON CONFLICT (procedure_id) DO UPDATE SET
                procedure_code = EXCLUDED.procedure_code,
                patient_sk = EXCLUDED.patient_sk,
                facility_sk = EXCLUDED.facility_sk,
                modality_sk = EXCLUDED.modality_sk,
                diagnosis_sk = EXCLUDED.diagnosis_sk,
                date_key = EXCLUDED.date_key,
                projection_name = EXCLUDED.projection_name,
                region_name = EXCLUDED.region_name,
                age_at_encounter = EXCLUDED.age_at_encounter,
                finding_severity = EXCLUDED.finding_severity,
                is_abnormal = EXCLUDED.is_abnormal,
                diagnosis_count = EXCLUDED.diagnosis_count,
                total_images = EXCLUDED.total_images,
                report_word_count = EXCLUDED.report_word_count,
                quality_score = EXCLUDED.quality_score,
                loaded_at = EXCLUDED.loaded_at",
            &[
                fact.procedure_id.as_uuid(),
                &fact.procedure_code,
                &fact.patient_sk.value(),
                &fact.facility_sk.value(),
                &fact.modality_sk.value(),
                &diagnosis_sk,
                &fact.date_key,
                &fact.projection_name,
                &fact.region_name,
                &fact.age_at_encounter,
                &severity,
                &fact.is_abnormal,
                &fact.diagnosis_count,
                &fact.total_images,
                &fact.report_word_count,
                &fact.quality_score,
                &fact.loaded_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn upsert_language_fact(&mut self, fact: &FactLanguageUsage) -> Result<()> {
        self.execute(
            "upsert fact_language_usage",
            "INSERT INTO analytics.fact_language_usage (
                report_id, procedure_id, patient_sk, facility_sk, date_key, language_code,
                language_name, audio_language_code, audio_language_name, has_audio, word_count,
                loaded_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (report_id) DO UPDATE SET
                procedure_id = EXCLUDED.procedure_id,
                patient_sk = EXCLUDED.patient_sk,
                facility_sk = EXCLUDED.facility_sk,
                date_key = EXCLUDED.date_key,
                language_code = EXCLUDED.language_code,
                language_name = EXCLUDED.language_name,
                audio_language_code = EXCLUDED.audio_language_code,
                audio_language_name = EXCLUDED.audio_language_name,
                has_audio = EXCLUDED.has_audio,
                word_count = EXCLUDED.word_count,
                loaded_at = EXCLUDED.loaded_at",
            &[
                fact.report_id.as_uuid(),
                fact.procedure_id.as_uuid(),
                &fact.patient_sk.value(),
                &fact.facility_sk.value(),
                &fact.date_key,
                &fact.language_code,
                &fact.language_name,
                &fact.audio_language_code,
                &fact.audio_language_name,
                &fact.has_audio,
                &fact.word_count,
                &fact.loaded_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn truncate_analytics(&mut self) -> Result<()> {
        self.conn()?
            .batch_execute(
                "TRUNCATE analytics.fact_procedure, analytics.fact_language_usage,
                          analytics.dim_patient, analytics.dim_facility, analytics.dim_modality,
                          analytics.dim_diagnosis, analytics.dim_date
                 RESTART IDENTITY",
            )
            .await
            .map_err(|e| map_pg_error(&e, "truncate analytics"))?;

        let kinds: Vec<&str> = KeyKind::SURROGATE.iter().map(|k| k.as_str()).collect();
        self.execute(
            "clear surrogate registry",
            "DELETE FROM audit.natural_key_registry WHERE key_kind = ANY($1)",
            &[&kinds],
        )
        .await?;
        Ok(())
    }

    async fn write_audit_entry(&mut self, entry: &AuditEntry) -> Result<()> {
        self.execute(
            "write audit entry",
            "INSERT INTO audit.row_change_log (
                run_id, table_name, row_id, operation, before_data, after_data, actor, changed_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &entry.run_id,
                &entry.table_name,
                &entry.row_id,
                &entry.operation.as_str(),
                &entry.before,
                &entry.after,
                &entry.actor,
                &entry.changed_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn write_quality_issues(&mut self, issues: &[QualityIssue]) -> Result<()> {
        for issue in issues {
            self.execute(
                "write quality issue",
                "INSERT INTO audit.data_quality_log (
                    run_id, detected_at, severity, stage, record_key, error_class, message,
                    is_synthetic
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &issue.run_id,
                    &issue.detected_at,
                    &issue.severity.as_str(),
                    &issue.stage.as_str(),
                    &issue.record_key,
                    &issue.error_class.as_str(),
                    &issue.message,
                    &issue.is_synthetic,
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn write_run_audit(&mut self, record: &RunAuditRecord) -> Result<()> {
        self.execute(
            "write run audit",
            "INSERT INTO audit.etl_run_log (
                run_id, pipeline_name, mode, started_at, finished_at, duration_ms, rows_loaded,
                rows_failed, status, error_message
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &record.run_id,
                &record.pipeline_name,
                &record.mode.as_str(),
                &record.started_at,
                &record.finished_at,
                &record.duration_ms,
                &record.rows_loaded,
                &record.rows_failed,
                &record.status.as_str(),
                &record.error_message,
            ],
        )
        .await?;
        Ok(())
    }

    async fn count_violations(&mut self, check: IntegrityCheck) -> Result<u64> {
        self.count(check.name(), violation_sql(check)).await
    }

    async fn recent_runs(&mut self, limit: usize) -> Result<Vec<RunAuditRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM audit.etl_run_log ORDER BY started_at DESC LIMIT $1"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query("recent runs", &sql, &[&limit])
            .await?
            .iter()
            .map(run_from_row)
            .collect()
    }

    async fn table_counts(&mut self) -> Result<Vec<TableCount>> {
        let mut counts = Vec::with_capacity(COUNTED_TABLES.len());
        for table in COUNTED_TABLES {
            let rows = self
                .count(table, &format!("SELECT COUNT(*) FROM {table}"))
                .await?;
            counts.push(TableCount {
                table_name: table.to_string(),
                rows: i64::try_from(rows).unwrap_or(i64::MAX),
            });
        }
        Ok(counts)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_check_has_a_count_query() {
        for check in IntegrityCheck::ALL {
            let sql = violation_sql(check);
            assert!(sql.trim_start().starts_with("SELECT"), "{}", check.name());
        }
    }
}
