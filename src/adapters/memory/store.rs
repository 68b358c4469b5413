//! In-process warehouse store
//!
//! Tables live in ordered maps behind one async mutex. A transaction owns the
//! lock for its whole lifetime and keeps a snapshot of the tables taken at
//! `begin`; rollback (explicit or by drop) restores the snapshot. The same
//! uniqueness, foreign-key, range and column-width constraints as the
//! PostgreSQL schema are enforced, so engine behaviour is identical on both backends.

use crate::adapters::database::traits::{
    IntegrityCheck, RegistryInsert, StateStorage, WarehouseStore, WarehouseTransaction,
};
use crate::core::state::watermark::Watermark;
use crate::domain::analytics::{
    DimDate, DimDiagnosis, DimFacility, DimModality, DimPatient, DimensionRow, FactLanguageUsage,
    FactProcedure,
};
use crate::domain::audit::{AuditEntry, QualityIssue, RunAuditRecord, TableCount};
use crate::domain::ids::{
    ArtifactId, EncounterId, InternalId, KeyKind, PatientCode, PatientId, ProcedureId,
    ReferenceId, SurrogateKey, MAX_CODE_LEN, MAX_ENCOUNTER_CODE_LEN, MAX_NAME_LEN,
};
use crate::domain::operational::{
    DiagnosisLinkRow, EncounterRow, FindingRow, ImageRow, PatientRow, ProcedureGraph,
    ProcedureRow, ReportRow,
};
use crate::domain::reference::{DisplayFields, EntityType, ReferenceEntity};
use crate::domain::{Result, WarehouseError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Every table of the warehouse
#[derive(Debug, Clone, Default)]
pub struct WarehouseTables {
    pub references: BTreeMap<(EntityType, String), ReferenceEntity>,
    pub registry: BTreeMap<(KeyKind, String), InternalId>,
    pub patients: BTreeMap<PatientId, PatientRow>,
    pub patient_codes: BTreeMap<String, PatientId>,
    pub encounters: BTreeMap<EncounterId, EncounterRow>,
    pub encounter_codes: BTreeSet<String>,
    pub procedures: BTreeMap<ProcedureId, ProcedureRow>,
    pub procedure_codes: BTreeSet<String>,
    pub images: Vec<ImageRow>,
    pub reports: Vec<ReportRow>,
    pub findings: Vec<FindingRow>,
    pub links: Vec<DiagnosisLinkRow>,
    pub dim_patient: BTreeMap<String, (SurrogateKey, DimPatient)>,
    pub dim_facility: BTreeMap<String, (SurrogateKey, DimFacility)>,
    pub dim_modality: BTreeMap<String, (SurrogateKey, DimModality)>,
    pub dim_diagnosis: BTreeMap<String, (SurrogateKey, DimDiagnosis)>,
    pub dim_date: BTreeMap<i32, DimDate>,
    pub procedure_facts: BTreeMap<ProcedureId, FactProcedure>,
    pub language_facts: BTreeMap<ArtifactId, FactLanguageUsage>,
    pub change_log: Vec<AuditEntry>,
    pub quality_log: Vec<QualityIssue>,
    pub run_log: Vec<RunAuditRecord>,
    next_surrogate: i64,
}

impl WarehouseTables {
    fn reference_by_id(&self, entity: EntityType, id: &ReferenceId) -> Option<&ReferenceEntity> {
        self.references
            .values()
            .find(|r| r.entity_type == entity && &r.id == id)
    }

    fn require_reference(&self, entity: EntityType, id: &ReferenceId, column: &str) -> Result<()> {
        if self.reference_by_id(entity, id).is_none() {
            return Err(WarehouseError::Integrity(format!(
                "{column} {id} is not present in {}",
                entity.table_name()
            )));
        }
        Ok(())
    }

    fn require_procedure(&self, id: &ProcedureId, table: &str) -> Result<()> {
        if !self.procedures.contains_key(id) {
            return Err(WarehouseError::Integrity(format!(
                "{table}.procedure_id {id} is not present in operational.procedures"
            )));
        }
        Ok(())
    }

    fn has_surrogate<T>(map: &BTreeMap<String, (SurrogateKey, T)>, key: &SurrogateKey) -> bool {
        map.values().any(|(sk, _)| sk == key)
    }

    fn require_surrogate<T>(
        map: &BTreeMap<String, (SurrogateKey, T)>,
        key: &SurrogateKey,
        column: &str,
    ) -> Result<()> {
        if !Self::has_surrogate(map, key) {
            return Err(WarehouseError::Integrity(format!(
                "{column} {key} has no dimension row"
            )));
        }
        Ok(())
    }

    fn active_link_count(&self, procedure_id: &ProcedureId) -> i32 {
        self.links
            .iter()
            .filter(|l| &l.procedure_id == procedure_id && l.is_active)
            .count() as i32
    }

    fn fact_is_orphan(&self, fact: &FactProcedure) -> bool {
        !Self::has_surrogate(&self.dim_patient, &fact.patient_sk)
            || !Self::has_surrogate(&self.dim_facility, &fact.facility_sk)
            || !Self::has_surrogate(&self.dim_modality, &fact.modality_sk)
            || !self.dim_date.contains_key(&fact.date_key)
            || fact
                .diagnosis_sk
                .is_some_and(|sk| !Self::has_surrogate(&self.dim_diagnosis, &sk))
    }

    fn count(&self, check: IntegrityCheck) -> u64 {
        let n = match check {
            IntegrityCheck::OrphanFactDimensions => {
                let facts = self
                    .procedure_facts
                    .values()
                    .filter(|f| self.fact_is_orphan(f))
                    .count();
                let language = self
                    .language_facts
                    .values()
                    .filter(|f| {
                        !Self::has_surrogate(&self.dim_patient, &f.patient_sk)
                            || !Self::has_surrogate(&self.dim_facility, &f.facility_sk)
                            || !self.dim_date.contains_key(&f.date_key)
                    })
                    .count();
                facts + language
            }
            IntegrityCheck::FactsWithoutProcedure => self
                .procedure_facts
                .keys()
                .filter(|id| !self.procedures.contains_key(id))
                .count(),
            // Facts are keyed by procedure id, so duplicates cannot be stored
            IntegrityCheck::DuplicateProcedureFacts => 0,
            IntegrityCheck::DiagnosisCountMismatch => self
                .procedure_facts
                .values()
                .filter(|f| f.diagnosis_count != self.active_link_count(&f.procedure_id))
                .count(),
            IntegrityCheck::ConfidenceOutOfRange => {
                self.findings
                    .iter()
                    .filter(|f| !in_unit_range(f.confidence))
                    .count()
                    + self
                        .links
                        .iter()
                        .filter(|l| !in_unit_range(l.confidence))
                        .count()
            }
            IntegrityCheck::QualityScoreOutOfRange => self
                .procedure_facts
                .values()
                .filter(|f| !in_unit_range(f.quality_score))
                .count(),
            IntegrityCheck::NegativeMeasures => {
                self.procedure_facts
                    .values()
                    .filter(|f| f.diagnosis_count < 0 || f.total_images < 0 || f.report_word_count < 0)
                    .count()
                    + self.reports.iter().filter(|r| r.word_count < 0).count()
                    + self
                        .patients
                        .values()
                        .filter(|p| p.total_encounters < 0)
                        .count()
            }
            IntegrityCheck::ReportsWithoutLanguage => self
                .reports
                .iter()
                .filter(|r| {
                    self.reference_by_id(EntityType::Language, &r.language_id)
                        .is_none()
                })
                .count(),
        };
        n as u64
    }

    fn counts(&self) -> Vec<TableCount> {
        let rows = [
            ("operational.patients", self.patients.len()),
            ("operational.encounters", self.encounters.len()),
            ("operational.procedures", self.procedures.len()),
            ("operational.radiological_images", self.images.len()),
            ("operational.clinical_reports", self.reports.len()),
            ("operational.findings", self.findings.len()),
            ("operational.procedure_diagnosis", self.links.len()),
            ("analytics.dim_patient", self.dim_patient.len()),
            ("analytics.dim_facility", self.dim_facility.len()),
            ("analytics.dim_modality", self.dim_modality.len()),
            ("analytics.dim_diagnosis", self.dim_diagnosis.len()),
            ("analytics.dim_date", self.dim_date.len()),
            ("analytics.fact_procedure", self.procedure_facts.len()),
            ("analytics.fact_language_usage", self.language_facts.len()),
        ];
        rows.iter()
            .map(|(table, n)| TableCount {
                table_name: table.to_string(),
                rows: *n as i64,
            })
            .collect()
    }
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn check_unit_range(column: &str, value: f64) -> Result<()> {
    if !in_unit_range(value) {
        return Err(WarehouseError::ValueRange(format!(
            "{column} = {value} violates check constraint (0 <= value <= 1)"
        )));
    }
    Ok(())
}

fn check_non_negative(column: &str, value: i32) -> Result<()> {
    if value < 0 {
        return Err(WarehouseError::ValueRange(format!(
            "{column} = {value} violates check constraint (value >= 0)"
        )));
    }
    Ok(())
}

/// VARCHAR(n) overflow, reported like SQLSTATE 22001
fn check_width(column: &str, value: &str, max: usize) -> Result<()> {
    let width = value.chars().count();
    if width > max {
        return Err(WarehouseError::ValueRange(format!(
            "value too long for {column}: {width} characters, limit is {max}"
        )));
    }
    Ok(())
}

fn since_matches(updated_at: DateTime<Utc>, since: Option<DateTime<Utc>>) -> bool {
    since.map_or(true, |since| updated_at >= since)
}

fn upsert_keyed<T>(
    map: &mut BTreeMap<String, (SurrogateKey, T)>,
    natural_ref: String,
    row: T,
    sequence: &mut i64,
) -> SurrogateKey {
    if let Some((sk, existing)) = map.get_mut(&natural_ref) {
        *existing = row;
        return *sk;
    }
    *sequence += 1;
    let sk = SurrogateKey::new(*sequence);
    map.insert(natural_ref, (sk, row));
    sk
}

/// In-process warehouse backend
///
/// Used by the test suite and by `database_target = "memory"` for local dry
/// runs. Transactions are serialized by the table lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<WarehouseTables>>,
    watermarks: Arc<Mutex<BTreeMap<String, Watermark>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away; `begin` fails with a systemic error while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Run a read-only closure against the committed tables
    pub async fn inspect<R>(&self, f: impl FnOnce(&WarehouseTables) -> R) -> R {
        let tables = self.tables.lock().await;
        f(&tables)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WarehouseError::Systemic(
                "memory store is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl WarehouseStore for MemoryStore {
    async fn test_connection(&self) -> Result<()> {
        self.check_available()
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.check_available()
    }

    async fn begin(&self) -> Result<Box<dyn WarehouseTransaction>> {
        self.check_available()?;
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction {
            tables: guard,
            snapshot: Some(snapshot),
            store_flag: self.unavailable.clone(),
        }))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl StateStorage for MemoryStore {
    async fn load_watermark(&self, pipeline_name: &str) -> Result<Option<Watermark>> {
        self.check_available()?;
        Ok(self.watermarks.lock().await.get(pipeline_name).cloned())
    }

    async fn save_watermark(&self, watermark: &Watermark, dry_run: bool) -> Result<()> {
        if dry_run {
            tracing::debug!(pipeline = %watermark.pipeline_name, "Dry run: watermark not saved");
            return Ok(());
        }
        self.check_available()?;
        self.watermarks
            .lock()
            .await
            .insert(watermark.pipeline_name.clone(), watermark.clone());
        Ok(())
    }

    async fn get_all_watermarks(&self) -> Result<Vec<Watermark>> {
        self.check_available()?;
        Ok(self.watermarks.lock().await.values().cloned().collect())
    }
}

/// Unit of work over the in-process tables
pub struct MemoryTransaction {
    tables: OwnedMutexGuard<WarehouseTables>,
    /// State at `begin`; `None` once committed
    snapshot: Option<WarehouseTables>,
    store_flag: Arc<AtomicBool>,
}

impl MemoryTransaction {
    fn check_available(&self) -> Result<()> {
        if self.store_flag.load(Ordering::SeqCst) {
            return Err(WarehouseError::Systemic(
                "memory store became unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.tables = snapshot;
        }
    }
}

#[async_trait]
impl WarehouseTransaction for MemoryTransaction {
    async fn find_reference(
        &mut self,
        entity: EntityType,
        code: &str,
    ) -> Result<Option<ReferenceEntity>> {
        self.check_available()?;
        Ok(self.tables.references.get(&(entity, code.to_string())).cloned())
    }

    async fn get_reference(
        &mut self,
        entity: EntityType,
        id: &ReferenceId,
    ) -> Result<Option<ReferenceEntity>> {
        Ok(self.tables.reference_by_id(entity, id).cloned())
    }

    async fn insert_reference_if_absent(
        &mut self,
        entity: EntityType,
        code: &str,
        display: &DisplayFields,
        candidate_id: &ReferenceId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        if code.is_empty() {
            return Err(WarehouseError::ValueRange(format!(
                "{}.code must not be empty",
                entity.table_name()
            )));
        }
        check_width(&format!("{}.code", entity.table_name()), code, MAX_CODE_LEN)?;
        check_width(
            &format!("{}.name", entity.table_name()),
            &display.name,
            MAX_NAME_LEN,
        )?;
        let key = (entity, code.to_string());
        if self.tables.references.contains_key(&key) {
            return Ok(false);
        }
        self.tables.references.insert(
            key,
            ReferenceEntity {
                id: *candidate_id,
                entity_type: entity,
                code: code.to_string(),
                display: display.clone(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(true)
    }

    async fn reference_changes(
        &mut self,
        entity: EntityType,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReferenceEntity>> {
        Ok(self
            .tables
            .references
            .values()
            .filter(|r| r.entity_type == entity && since_matches(r.updated_at, since))
            .cloned()
            .collect())
    }

    async fn registry_get(
        &mut self,
        kind: KeyKind,
        natural_key: &str,
    ) -> Result<Option<InternalId>> {
        self.check_available()?;
        Ok(self
            .tables
            .registry
            .get(&(kind, natural_key.to_string()))
            .copied())
    }

    async fn registry_insert_if_absent(
        &mut self,
        kind: KeyKind,
        natural_key: &str,
        internal_id: &InternalId,
    ) -> Result<RegistryInsert> {
        let key = (kind, natural_key.to_string());
        match self.tables.registry.get(&key) {
            Some(existing) => Ok(RegistryInsert::Existing(*existing)),
            None => {
                self.tables.registry.insert(key, *internal_id);
                Ok(RegistryInsert::Inserted)
            }
        }
    }

    async fn find_patient(&mut self, code: &PatientCode) -> Result<Option<PatientRow>> {
        let tables = &self.tables;
        Ok(tables
            .patient_codes
            .get(code.as_str())
            .and_then(|id| tables.patients.get(id))
            .cloned())
    }

    async fn get_patient(&mut self, id: &PatientId) -> Result<Option<PatientRow>> {
        Ok(self.tables.patients.get(id).cloned())
    }

    async fn insert_patient_if_absent(&mut self, patient: &PatientRow) -> Result<bool> {
        self.check_available()?;
        check_non_negative("patients.total_encounters", patient.total_encounters)?;
        check_width("patients.patient_code", patient.patient_code.as_str(), MAX_CODE_LEN)?;
        let code = patient.patient_code.as_str().to_string();
        if self.tables.patient_codes.contains_key(&code) {
            return Ok(false);
        }
        self.tables.patient_codes.insert(code, patient.id);
        self.tables.patients.insert(patient.id, patient.clone());
        Ok(true)
    }

    async fn apply_encounter_rollup(
        &mut self,
        patient_id: &PatientId,
        encounter_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<PatientRow> {
        let patient = self.tables.patients.get_mut(patient_id).ok_or_else(|| {
            WarehouseError::Integrity(format!("patient {patient_id} does not exist"))
        })?;
        patient.apply_encounter(encounter_date, now);
        Ok(patient.clone())
    }

    async fn get_encounter(&mut self, id: &EncounterId) -> Result<Option<EncounterRow>> {
        Ok(self.tables.encounters.get(id).cloned())
    }

    async fn insert_encounter(&mut self, encounter: &EncounterRow) -> Result<()> {
        self.check_available()?;
        let code = encounter.encounter_code.as_str();
        check_width("encounters.encounter_code", code, MAX_ENCOUNTER_CODE_LEN)?;
        if self.tables.encounter_codes.contains(code) {
            return Err(WarehouseError::Integrity(format!(
                "duplicate key: encounter_code '{code}' already exists"
            )));
        }
        if !self.tables.patients.contains_key(&encounter.patient_id) {
            return Err(WarehouseError::Integrity(format!(
                "encounters.patient_id {} is not present in operational.patients",
                encounter.patient_id
            )));
        }
        self.tables
            .require_reference(EntityType::Facility, &encounter.facility_id, "encounters.facility_id")?;

        self.tables.encounter_codes.insert(code.to_string());
        self.tables.encounters.insert(encounter.id, encounter.clone());
        Ok(())
    }

    async fn insert_procedure(&mut self, procedure: &ProcedureRow) -> Result<()> {
        self.check_available()?;
        let code = procedure.procedure_code.as_str();
        check_width("procedures.procedure_code", code, 120)?;
        if self.tables.procedure_codes.contains(code) {
            return Err(WarehouseError::Integrity(format!(
                "duplicate key: procedure_code '{code}' already exists"
            )));
        }
        if !self.tables.encounters.contains_key(&procedure.encounter_id) {
            return Err(WarehouseError::Integrity(format!(
                "procedures.encounter_id {} is not present in operational.encounters",
                procedure.encounter_id
            )));
        }
        self.tables.require_reference(
            EntityType::Modality,
            &procedure.modality_id,
            "procedures.modality_id",
        )?;
        if let Some(id) = &procedure.projection_id {
            self.tables
                .require_reference(EntityType::Projection, id, "procedures.projection_id")?;
        }
        if let Some(id) = &procedure.region_id {
            self.tables
                .require_reference(EntityType::AnatomicalRegion, id, "procedures.region_id")?;
        }

        self.tables.procedure_codes.insert(code.to_string());
        self.tables.procedures.insert(procedure.id, procedure.clone());
        Ok(())
    }

    async fn insert_image(&mut self, image: &ImageRow) -> Result<()> {
        check_width("radiological_images.image_code", &image.image_code, MAX_ENCOUNTER_CODE_LEN)?;
        check_width("radiological_images.filename", &image.filename, MAX_NAME_LEN)?;
        self.tables
            .require_procedure(&image.procedure_id, "radiological_images")?;
        self.tables.images.push(image.clone());
        Ok(())
    }

    async fn insert_report(&mut self, report: &ReportRow) -> Result<()> {
        self.tables
            .require_procedure(&report.procedure_id, "clinical_reports")?;
        self.tables.require_reference(
            EntityType::Language,
            &report.language_id,
            "clinical_reports.language_id",
        )?;
        if let Some(id) = &report.audio_language_id {
            self.tables.require_reference(
                EntityType::Language,
                id,
                "clinical_reports.audio_language_id",
            )?;
        }
        check_non_negative("clinical_reports.word_count", report.word_count)?;
        self.tables.reports.push(report.clone());
        Ok(())
    }

    async fn insert_finding(&mut self, finding: &FindingRow) -> Result<()> {
        self.tables.require_procedure(&finding.procedure_id, "findings")?;
        check_unit_range("findings.confidence_score", finding.confidence)?;
        self.tables.findings.push(finding.clone());
        Ok(())
    }

    async fn insert_diagnosis_link(&mut self, link: &DiagnosisLinkRow) -> Result<()> {
        self.tables
            .require_procedure(&link.procedure_id, "procedure_diagnosis")?;
        self.tables.require_reference(
            EntityType::Diagnosis,
            &link.diagnosis_id,
            "procedure_diagnosis.diagnosis_id",
        )?;
        if self
            .tables
            .links
            .iter()
            .any(|l| l.procedure_id == link.procedure_id && l.diagnosis_id == link.diagnosis_id)
        {
            return Err(WarehouseError::Integrity(format!(
                "duplicate key: diagnosis {} already linked to procedure {}",
                link.diagnosis_id, link.procedure_id
            )));
        }
        if link.sequence <= 0 {
            return Err(WarehouseError::ValueRange(format!(
                "procedure_diagnosis.diagnosis_sequence = {} violates check constraint (value > 0)",
                link.sequence
            )));
        }
        check_unit_range("procedure_diagnosis.confidence_score", link.confidence)?;
        self.tables.links.push(link.clone());
        Ok(())
    }

    async fn changed_patients(&mut self, since: Option<DateTime<Utc>>) -> Result<Vec<PatientRow>> {
        self.check_available()?;
        Ok(self
            .tables
            .patients
            .values()
            .filter(|p| since_matches(p.updated_at, since))
            .cloned()
            .collect())
    }

    async fn changed_procedures(
        &mut self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProcedureId>> {
        let mut changed: Vec<&ProcedureRow> = self
            .tables
            .procedures
            .values()
            .filter(|p| since_matches(p.updated_at, since))
            .collect();
        changed.sort_by(|a, b| a.procedure_code.cmp(&b.procedure_code));
        Ok(changed.into_iter().map(|p| p.id).collect())
    }

    async fn load_procedure_graphs(&mut self, ids: &[ProcedureId]) -> Result<Vec<ProcedureGraph>> {
        let tables = &self.tables;
        let mut graphs = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(procedure) = tables.procedures.get(id) else {
                continue;
            };
            let encounter = tables.encounters.get(&procedure.encounter_id).ok_or_else(|| {
                WarehouseError::Integrity(format!(
                    "procedure {id} references missing encounter {}",
                    procedure.encounter_id
                ))
            })?;
            let patient = tables.patients.get(&encounter.patient_id).ok_or_else(|| {
                WarehouseError::Integrity(format!(
                    "encounter {} references missing patient {}",
                    encounter.id, encounter.patient_id
                ))
            })?;

            graphs.push(ProcedureGraph {
                procedure: procedure.clone(),
                encounter: encounter.clone(),
                patient: patient.clone(),
                images: tables
                    .images
                    .iter()
                    .filter(|i| &i.procedure_id == id)
                    .cloned()
                    .collect(),
                reports: tables
                    .reports
                    .iter()
                    .filter(|r| &r.procedure_id == id)
                    .cloned()
                    .collect(),
                findings: tables
                    .findings
                    .iter()
                    .filter(|f| &f.procedure_id == id)
                    .cloned()
                    .collect(),
                links: tables
                    .links
                    .iter()
                    .filter(|l| &l.procedure_id == id)
                    .cloned()
                    .collect(),
            });
        }
        Ok(graphs)
    }

    async fn upsert_dimension(&mut self, row: &DimensionRow) -> Result<SurrogateKey> {
        self.check_available()?;
        let natural_ref = row.natural_ref();
        let tables = &mut *self.tables;

        let sk = match row {
            DimensionRow::Date(date) => {
                tables.dim_date.insert(date.date_key, date.clone());
                SurrogateKey::new(date.date_key as i64)
            }
            DimensionRow::Patient(dim) => upsert_keyed(
                &mut tables.dim_patient,
                natural_ref,
                dim.clone(),
                &mut tables.next_surrogate,
            ),
            DimensionRow::Facility(dim) => upsert_keyed(
                &mut tables.dim_facility,
                natural_ref,
                dim.clone(),
                &mut tables.next_surrogate,
            ),
            DimensionRow::Modality(dim) => upsert_keyed(
                &mut tables.dim_modality,
                natural_ref,
                dim.clone(),
                &mut tables.next_surrogate,
            ),
            DimensionRow::Diagnosis(dim) => upsert_keyed(
                &mut tables.dim_diagnosis,
                natural_ref,
                dim.clone(),
                &mut tables.next_surrogate,
            ),
        };
        Ok(sk)
    }

    async fn upsert_procedure_fact(&mut self, fact: &FactProcedure) -> Result<()> {
        self.check_available()?;
        let tables = &*self.tables;
        tables.require_procedure(&fact.procedure_id, "fact_procedure")?;
        WarehouseTables::require_surrogate(&tables.dim_patient, &fact.patient_sk, "fact_procedure.patient_sk")?;
        WarehouseTables::require_surrogate(&tables.dim_facility, &fact.facility_sk, "fact_procedure.facility_sk")?;
        WarehouseTables::require_surrogate(&tables.dim_modality, &fact.modality_sk, "fact_procedure.modality_sk")?;
        if let Some(sk) = &fact.diagnosis_sk {
            WarehouseTables::require_surrogate(&tables.dim_diagnosis, sk, "fact_procedure.diagnosis_sk")?;
        }
        if !tables.dim_date.contains_key(&fact.date_key) {
            return Err(WarehouseError::Integrity(format!(
                "fact_procedure.date_key {} has no dimension row",
                fact.date_key
            )));
        }
        check_unit_range("fact_procedure.quality_score", fact.quality_score)?;
        check_non_negative("fact_procedure.diagnosis_count", fact.diagnosis_count)?;
        check_non_negative("fact_procedure.total_images", fact.total_images)?;
        check_non_negative("fact_procedure.report_word_count", fact.report_word_count)?;

        self.tables
            .procedure_facts
            .insert(fact.procedure_id, fact.clone());
        Ok(())
    }

    async fn upsert_language_fact(&mut self, fact: &FactLanguageUsage) -> Result<()> {
        let tables = &*self.tables;
        if !tables.reports.iter().any(|r| r.id == fact.report_id) {
            return Err(WarehouseError::Integrity(format!(
                "fact_language_usage.report_id {} is not present in operational.clinical_reports",
                fact.report_id
            )));
        }
        WarehouseTables::require_surrogate(&tables.dim_patient, &fact.patient_sk, "fact_language_usage.patient_sk")?;
        WarehouseTables::require_surrogate(&tables.dim_facility, &fact.facility_sk, "fact_language_usage.facility_sk")?;
        check_non_negative("fact_language_usage.word_count", fact.word_count)?;

        self.tables
            .language_facts
            .insert(fact.report_id, fact.clone());
        Ok(())
    }

    async fn truncate_analytics(&mut self) -> Result<()> {
        let tables = &mut *self.tables;
        tables.procedure_facts.clear();
        tables.language_facts.clear();
        tables.dim_patient.clear();
        tables.dim_facility.clear();
        tables.dim_modality.clear();
        tables.dim_diagnosis.clear();
        tables.dim_date.clear();
        tables.registry.retain(|(kind, _), _| !kind.is_surrogate());
        Ok(())
    }

    async fn write_audit_entry(&mut self, entry: &AuditEntry) -> Result<()> {
        self.tables.change_log.push(entry.clone());
        Ok(())
    }

    async fn write_quality_issues(&mut self, issues: &[QualityIssue]) -> Result<()> {
        self.check_available()?;
        self.tables.quality_log.extend_from_slice(issues);
        Ok(())
    }

    async fn write_run_audit(&mut self, record: &RunAuditRecord) -> Result<()> {
        self.check_available()?;
        self.tables.run_log.push(record.clone());
        Ok(())
    }

    async fn count_violations(&mut self, check: IntegrityCheck) -> Result<u64> {
        self.check_available()?;
        Ok(self.tables.count(check))
    }

    async fn recent_runs(&mut self, limit: usize) -> Result<Vec<RunAuditRecord>> {
        Ok(self
            .tables
            .run_log
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn table_counts(&mut self) -> Result<Vec<TableCount>> {
        Ok(self.tables.counts())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.check_available()?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Drop restores the snapshot
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::EncounterCode;

    fn patient(code: &str) -> PatientRow {
        let now = Utc::now();
        PatientRow {
            id: PatientId::generate(),
            patient_code: PatientCode::new(code).unwrap(),
            sex: Some("F".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1967, 3, 18),
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
        }
    }

    async fn seed_reference(
        tx: &mut Box<dyn WarehouseTransaction>,
        entity: EntityType,
        code: &str,
    ) -> ReferenceId {
        let id = ReferenceId::generate();
        tx.insert_reference_if_absent(entity, code, &DisplayFields::named(code), &id, Utc::now())
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_patient_if_absent(&patient("PAT1")).await.unwrap());
        tx.rollback().await.unwrap();

        let count = store.inspect(|t| t.patients.len()).await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_drop_without_commit_discards() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_patient_if_absent(&patient("PAT1")).await.unwrap();
        }
        assert_eq!(store.inspect(|t| t.patients.len()).await, 0);
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_patient_if_absent(&patient("PAT1")).await.unwrap();
        assert!(!tx.insert_patient_if_absent(&patient("PAT1")).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.inspect(|t| t.patients.len()).await, 1);
    }

    #[tokio::test]
    async fn test_reference_first_write_wins() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = ReferenceId::generate();
        let second = ReferenceId::generate();

        assert!(tx
            .insert_reference_if_absent(EntityType::Modality, "RF", &DisplayFields::named("Radiofluoroscopy"), &first, Utc::now())
            .await
            .unwrap());
        assert!(!tx
            .insert_reference_if_absent(EntityType::Modality, "RF", &DisplayFields::named("Other"), &second, Utc::now())
            .await
            .unwrap());

        let stored = tx.find_reference(EntityType::Modality, "RF").await.unwrap().unwrap();
        assert_eq!(stored.id, first);
        assert_eq!(stored.display.name, "Radiofluoroscopy");
    }

    #[tokio::test]
    async fn test_reference_code_wider_than_column_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let code = "X".repeat(MAX_CODE_LEN + 1);

        let err = tx
            .insert_reference_if_absent(
                EntityType::Facility,
                &code,
                &DisplayFields::named("Clinic"),
                &ReferenceId::generate(),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::ValueRange(_)));
        assert!(tx.find_reference(EntityType::Facility, &code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_encounter_requires_facility() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let p = patient("PAT1");
        tx.insert_patient_if_absent(&p).await.unwrap();

        let now = Utc::now();
        let encounter = EncounterRow {
            id: EncounterId::generate(),
            encounter_code: EncounterCode::new("E1").unwrap(),
            patient_id: p.id,
            facility_id: ReferenceId::generate(),
            encounter_at: now,
            referring_physician: None,
            notes: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let err = tx.insert_encounter(&encounter).await.unwrap_err();
        assert!(matches!(err, WarehouseError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_link_confidence_range_and_duplicates() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let p = patient("PAT1");
        tx.insert_patient_if_absent(&p).await.unwrap();
        let facility = seed_reference(&mut tx, EntityType::Facility, "TEACHING_HOSPITAL").await;
        let modality = seed_reference(&mut tx, EntityType::Modality, "DX").await;
        let diagnosis = seed_reference(&mut tx, EntityType::Diagnosis, "pneumonia").await;

        let now = Utc::now();
        let encounter_id = EncounterId::generate();
        tx.insert_encounter(&EncounterRow {
            id: encounter_id,
            encounter_code: EncounterCode::new("E1").unwrap(),
            patient_id: p.id,
            facility_id: facility,
            encounter_at: now,
            referring_physician: None,
            notes: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        let procedure_id = ProcedureId::generate();
        tx.insert_procedure(&ProcedureRow {
            id: procedure_id,
            procedure_code: "E1-P1".to_string(),
            encounter_id,
            modality_id: modality,
            projection_id: None,
            region_id: None,
            procedure_at: now,
            technician_name: None,
            notes: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

        let mut link = DiagnosisLinkRow {
            id: ArtifactId::generate(),
            procedure_id,
            diagnosis_id: diagnosis,
            sequence: 1,
            is_primary: true,
            confidence: 1.5,
            is_active: true,
            created_at: now,
        };
        let err = tx.insert_diagnosis_link(&link).await.unwrap_err();
        assert!(matches!(err, WarehouseError::ValueRange(_)));

        link.confidence = 0.8;
        tx.insert_diagnosis_link(&link).await.unwrap();
        link.id = ArtifactId::generate();
        let err = tx.insert_diagnosis_link(&link).await.unwrap_err();
        assert!(matches!(err, WarehouseError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_dimension_upsert_keeps_surrogate() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let id = ReferenceId::generate();
        let mut dim = DimModality {
            modality_id: id,
            modality_code: "RF".to_string(),
            modality_name: "Radiofluoroscopy".to_string(),
        };
        let first = tx.upsert_dimension(&DimensionRow::Modality(dim.clone())).await.unwrap();
        dim.modality_name = "Fluoroscopy".to_string();
        let second = tx.upsert_dimension(&DimensionRow::Modality(dim)).await.unwrap();
        assert_eq!(first, second);
        tx.commit().await.unwrap();

        let name = store
            .inspect(|t| t.dim_modality.values().next().map(|(_, d)| d.modality_name.clone()))
            .await;
        assert_eq!(name.as_deref(), Some("Fluoroscopy"));
    }

    #[tokio::test]
    async fn test_truncate_clears_surrogate_registry_only() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.registry_insert_if_absent(KeyKind::Patient, "PAT1", &InternalId::Record(uuid::Uuid::new_v4()))
            .await
            .unwrap();
        tx.registry_insert_if_absent(KeyKind::DimPatient, "PAT1", &InternalId::Surrogate(1))
            .await
            .unwrap();
        tx.truncate_analytics().await.unwrap();

        assert!(tx.registry_get(KeyKind::Patient, "PAT1").await.unwrap().is_some());
        assert!(tx.registry_get(KeyKind::DimPatient, "PAT1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_systemic() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.begin().await.err().unwrap();
        assert!(err.is_systemic());
        assert!(store.test_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_watermark_storage() {
        let store = MemoryStore::new();
        let watermark = Watermark::new("nightly");
        store.save_watermark(&watermark, false).await.unwrap();
        assert!(store.load_watermark("nightly").await.unwrap().is_some());
        assert!(store.load_watermark("other").await.unwrap().is_none());
    }
}
