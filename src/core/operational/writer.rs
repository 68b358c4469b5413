//! Operational writer
//!
//! Writes one encounter subtree (patient rollup, encounter, procedures and
//! their artifacts) in foreign-key order inside the caller's transaction.
//! The caller owns commit and rollback, so either the whole subtree lands or
//! none of it does.

use crate::adapters::database::traits::WarehouseTransaction;
use crate::core::master::catalog::{
    diagnosis_display, facility_display, infer_region, modality_code, modality_display,
    projection_code, projection_display, region_code, region_display, region_display_for_code,
    summarize_text, word_count, REPORT_TYPE,
};
use crate::core::master::MasterDataResolver;
use crate::core::operational::hooks::{Mutation, MutationHook};
use crate::core::registry::NaturalKeyRegistry;
use crate::domain::audit::MutationKind;
use crate::domain::ids::{
    ArtifactId, EncounterCode, EncounterId, InternalId, KeyKind, PatientCode, PatientId,
    ProcedureId, ReferenceId,
};
use crate::domain::operational::{
    DiagnosisLinkRow, EncounterRow, FindingRow, ImageRow, PatientRow, ProcedureRow, ReportRow,
    Severity,
};
use crate::domain::records::{
    normalize_code, EncounterSpec, FacilitySpec, PatientSpec, ProcedureSpec,
};
use crate::domain::reference::EntityType;
use crate::domain::{Result, WarehouseError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const PATIENTS: &str = "operational.patients";
const ENCOUNTERS: &str = "operational.encounters";
const PROCEDURES: &str = "operational.procedures";
const IMAGES: &str = "operational.radiological_images";
const REPORTS: &str = "operational.clinical_reports";
const FINDINGS: &str = "operational.findings";
const DIAGNOSIS_LINKS: &str = "operational.procedure_diagnosis";

/// Default-language rule for reports
///
/// A report without a language is in English; a report with audio but no
/// audio language has English audio. English is resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultLanguageRule {
    english: ReferenceId,
}

impl DefaultLanguageRule {
    pub fn new(english: ReferenceId) -> Self {
        Self { english }
    }

    pub fn english(&self) -> ReferenceId {
        self.english
    }

    /// Language of the report text
    pub async fn report_language(
        &self,
        resolver: &MasterDataResolver,
        tx: &mut dyn WarehouseTransaction,
        code: Option<&str>,
    ) -> Result<ReferenceId> {
        resolver.resolve_language(tx, code, self.english).await
    }

    /// Language of the report audio; `None` when there is neither audio nor an audio language
    pub async fn audio_language(
        &self,
        resolver: &MasterDataResolver,
        tx: &mut dyn WarehouseTransaction,
        has_audio: bool,
        code: Option<&str>,
    ) -> Result<Option<ReferenceId>> {
        let declared = code.map(str::trim).filter(|c| !c.is_empty());
        if !has_audio && declared.is_none() {
            return Ok(None);
        }
        resolver
            .resolve_language(tx, declared, self.english)
            .await
            .map(Some)
    }
}

/// Per-run values shared by every write
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub run_id: Uuid,
    pub languages: DefaultLanguageRule,
}

impl RunContext {
    pub fn new(run_id: Uuid, english: ReferenceId) -> Self {
        Self {
            run_id,
            languages: DefaultLanguageRule::new(english),
        }
    }
}

/// Result of [`OperationalWriter::write_encounter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub encounter_id: EncounterId,
    /// `false` when the encounter code was already registered and nothing was written
    pub created: bool,
    pub procedures: Vec<ProcedureId>,
}

/// Writer of the operational graph
pub struct OperationalWriter {
    resolver: MasterDataResolver,
    registry: NaturalKeyRegistry,
    hooks: Vec<Arc<dyn MutationHook>>,
}

impl OperationalWriter {
    pub fn new(resolver: MasterDataResolver, registry: NaturalKeyRegistry) -> Self {
        Self {
            resolver,
            registry,
            hooks: Vec::new(),
        }
    }

    /// Add a hook called after every mutation
    pub fn with_hook(mut self, hook: Arc<dyn MutationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Write one encounter subtree
    ///
    /// Steps, in order: facility resolution, patient create-or-rollup,
    /// encounter, then for each procedure the procedure row, images, report,
    /// findings and diagnosis links. An encounter code seen before is skipped.
    ///
    /// # Errors
    ///
    /// Any error leaves partial writes in `tx`; the caller must roll back.
    pub async fn write_encounter(
        &self,
        tx: &mut dyn WarehouseTransaction,
        ctx: &RunContext,
        patient: &PatientSpec,
        facility: &FacilitySpec,
        encounter: &EncounterSpec,
    ) -> Result<WriteOutcome> {
        let patient_code = patient.code()?;
        let encounter_code = encounter.code()?;
        let facility_code = facility.natural_code()?;

        if let Some(existing) = self
            .registry
            .try_lookup(tx, KeyKind::Encounter, encounter_code.as_str())
            .await?
        {
            let id = existing.as_record().ok_or_else(|| {
                WarehouseError::Integrity(format!(
                    "encounter '{encounter_code}' is registered to a surrogate key"
                ))
            })?;
            let encounter_id = EncounterId::from_uuid(id);
            self.ensure_same_owner(tx, &encounter_id, &encounter_code, &patient_code, &facility_code)
                .await?;
            tracing::debug!(encounter = %encounter_code, "Encounter already loaded, skipping");
            return Ok(WriteOutcome {
                encounter_id,
                created: false,
                procedures: Vec::new(),
            });
        }

        let facility_id = self
            .resolver
            .resolve_or_create(
                tx,
                EntityType::Facility,
                &facility_code,
                &facility_display(facility),
            )
            .await?;

        let now = Utc::now();
        let patient_id = self.ensure_patient(tx, ctx, patient, now).await?;

        let before = tx.get_patient(&patient_id).await?;
        let after = tx
            .apply_encounter_rollup(&patient_id, encounter.encounter_at.date_naive(), now)
            .await?;
        self.emit(
            tx,
            ctx,
            PATIENTS,
            patient_id.to_string(),
            MutationKind::Update,
            before.as_ref(),
            Some(&after),
        )
        .await?;

        let encounter_row = EncounterRow {
            id: EncounterId::generate(),
            encounter_code: encounter_code.clone(),
            patient_id,
            facility_id,
            encounter_at: encounter.encounter_at,
            referring_physician: encounter.referring_physician.clone(),
            notes: encounter.notes.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tx.insert_encounter(&encounter_row).await?;
        self.inserted(tx, ctx, ENCOUNTERS, encounter_row.id.to_string(), &encounter_row)
            .await?;
        self.registry
            .register(
                tx,
                KeyKind::Encounter,
                encounter_code.as_str(),
                InternalId::from(encounter_row.id),
            )
            .await?;

        let mut procedures = Vec::with_capacity(encounter.procedures.len());
        for (index, spec) in encounter.procedures.iter().enumerate() {
            let id = self
                .write_procedure(tx, ctx, &encounter_row, &encounter_code, index + 1, spec, now)
                .await?;
            procedures.push(id);
        }

        Ok(WriteOutcome {
            encounter_id: encounter_row.id,
            created: true,
            procedures,
        })
    }

    /// A re-submitted encounter code must still belong to the same patient and facility
    async fn ensure_same_owner(
        &self,
        tx: &mut dyn WarehouseTransaction,
        encounter_id: &EncounterId,
        encounter_code: &EncounterCode,
        patient_code: &PatientCode,
        facility_code: &str,
    ) -> Result<()> {
        let existing = tx.get_encounter(encounter_id).await?.ok_or_else(|| {
            WarehouseError::Integrity(format!(
                "encounter '{encounter_code}' is registered but has no operational row"
            ))
        })?;

        let patient = tx.find_patient(patient_code).await?.map(|p| p.id);
        if patient != Some(existing.patient_id) {
            return Err(WarehouseError::Integrity(format!(
                "encounter '{encounter_code}' is already loaded for a different patient than '{patient_code}'"
            )));
        }

        let facility = tx
            .find_reference(EntityType::Facility, facility_code)
            .await?
            .map(|f| f.id);
        if facility != Some(existing.facility_id) {
            return Err(WarehouseError::Integrity(format!(
                "encounter '{encounter_code}' is already loaded for a different facility than '{facility_code}'"
            )));
        }
        Ok(())
    }

    async fn ensure_patient(
        &self,
        tx: &mut dyn WarehouseTransaction,
        ctx: &RunContext,
        spec: &PatientSpec,
        now: DateTime<Utc>,
    ) -> Result<PatientId> {
        let code = spec.code()?;
        if let Some(existing) = tx.find_patient(&code).await? {
            return Ok(existing.id);
        }

        let row = PatientRow {
            id: PatientId::generate(),
            patient_code: code.clone(),
            sex: spec.sex.clone(),
            date_of_birth: spec.date_of_birth,
            reported_age: spec.reported_age,
            height_cm: spec.height_cm,
            weight_kg: spec.weight_kg,
            geographic_location: spec.geographic_location.clone(),
            is_synthetic: spec.is_synthetic,
            first_encounter_date: None,
            last_encounter_date: None,
            total_encounters: 0,
            created_at: now,
            updated_at: now,
        };

        if tx.insert_patient_if_absent(&row).await? {
            self.inserted(tx, ctx, PATIENTS, row.id.to_string(), &row).await?;
            self.registry
                .register(tx, KeyKind::Patient, code.as_str(), InternalId::from(row.id))
                .await?;
            tracing::debug!(patient = %code, "Created patient");
            return Ok(row.id);
        }

        tx.find_patient(&code)
            .await?
            .map(|p| p.id)
            .ok_or_else(|| WarehouseError::Integrity(format!("patient '{code}' vanished after conflict")))
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_procedure(
        &self,
        tx: &mut dyn WarehouseTransaction,
        ctx: &RunContext,
        encounter: &EncounterRow,
        encounter_code: &EncounterCode,
        position: usize,
        spec: &ProcedureSpec,
        now: DateTime<Utc>,
    ) -> Result<ProcedureId> {
        let modality_id = self
            .resolver
            .resolve_or_create(
                tx,
                EntityType::Modality,
                &modality_code(&spec.modality_code),
                &modality_display(&spec.modality_code),
            )
            .await?;

        let projection_id = match spec.projection_code.as_deref() {
            Some(code) => Some(
                self.resolver
                    .resolve_or_create(
                        tx,
                        EntityType::Projection,
                        &projection_code(code),
                        &projection_display(code),
                    )
                    .await?,
            ),
            None => None,
        };

        let region_id = match spec.region_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                self.resolver
                    .resolve_or_create(
                        tx,
                        EntityType::AnatomicalRegion,
                        &region_code(code),
                        &region_display_for_code(code),
                    )
                    .await?
            }
            _ => {
                let region = infer_region(&spec.label_text());
                self.resolver
                    .resolve_or_create(
                        tx,
                        EntityType::AnatomicalRegion,
                        region.code,
                        &region_display(&region),
                    )
                    .await?
            }
        };

        let procedure = ProcedureRow {
            id: ProcedureId::generate(),
            procedure_code: encounter_code.procedure_code(position),
            encounter_id: encounter.id,
            modality_id,
            projection_id,
            region_id: Some(region_id),
            procedure_at: spec.procedure_at.unwrap_or(encounter.encounter_at),
            technician_name: spec.technician_name.clone(),
            notes: spec.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_procedure(&procedure).await?;
        self.inserted(tx, ctx, PROCEDURES, procedure.id.to_string(), &procedure)
            .await?;
        self.registry
            .register(
                tx,
                KeyKind::Procedure,
                &procedure.procedure_code,
                InternalId::from(procedure.id),
            )
            .await?;

        for image in &spec.images {
            let row = ImageRow {
                id: ArtifactId::generate(),
                procedure_id: procedure.id,
                image_code: image.image_code.trim().to_string(),
                filename: image.filename().to_string(),
                path: image.path.clone(),
                study_id: image.study_id.clone(),
                created_at: now,
            };
            tx.insert_image(&row).await?;
            self.inserted(tx, ctx, IMAGES, row.id.to_string(), &row).await?;
        }

        if let Some(report) = &spec.report {
            let language_id = ctx
                .languages
                .report_language(&self.resolver, tx, report.language_code.as_deref())
                .await?;
            let audio_language_id = ctx
                .languages
                .audio_language(
                    &self.resolver,
                    tx,
                    report.has_audio,
                    report.audio_language_code.as_deref(),
                )
                .await?;

            let row = ReportRow {
                id: ArtifactId::generate(),
                procedure_id: procedure.id,
                language_id,
                text: report.text.clone(),
                report_type: REPORT_TYPE.to_string(),
                word_count: word_count(&report.text),
                summary: summarize_text(&report.text),
                has_audio: report.has_audio,
                audio_language_id,
                reviewed_by: report.reviewed_by.clone(),
                reviewed_at: report.reviewed_at,
                created_at: now,
            };
            tx.insert_report(&row).await?;
            self.inserted(tx, ctx, REPORTS, row.id.to_string(), &row).await?;
        }

        for finding in &spec.findings {
            let severity = finding
                .severity
                .unwrap_or_else(|| Severity::from_labels(&finding.labels));
            let row = FindingRow {
                id: ArtifactId::generate(),
                procedure_id: procedure.id,
                findings_text: finding.findings_text.clone(),
                impression_text: finding.impression_text.clone(),
                severity,
                abnormality_detected: finding
                    .abnormality_detected
                    .unwrap_or(severity != Severity::Normal),
                confidence: finding.confidence,
                created_at: now,
            };
            tx.insert_finding(&row).await?;
            self.inserted(tx, ctx, FINDINGS, row.id.to_string(), &row).await?;
        }

        for (index, diagnosis) in spec.diagnoses.iter().enumerate() {
            let diagnosis_id = self
                .resolver
                .resolve_or_create(
                    tx,
                    EntityType::Diagnosis,
                    &normalize_code(&diagnosis.name),
                    &diagnosis_display(&diagnosis.name),
                )
                .await?;
            let sequence = i32::try_from(index + 1).unwrap_or(i32::MAX);
            let row = DiagnosisLinkRow {
                id: ArtifactId::generate(),
                procedure_id: procedure.id,
                diagnosis_id,
                sequence,
                is_primary: sequence == 1,
                confidence: diagnosis.confidence,
                is_active: true,
                created_at: now,
            };
            tx.insert_diagnosis_link(&row).await?;
            self.inserted(tx, ctx, DIAGNOSIS_LINKS, row.id.to_string(), &row)
                .await?;
        }

        Ok(procedure.id)
    }

    async fn inserted<T: Serialize + Sync>(
        &self,
        tx: &mut dyn WarehouseTransaction,
        ctx: &RunContext,
        table: &'static str,
        row_id: String,
        row: &T,
    ) -> Result<()> {
        self.emit(tx, ctx, table, row_id, MutationKind::Insert, None, Some(row))
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit<T: Serialize + Sync>(
        &self,
        tx: &mut dyn WarehouseTransaction,
        ctx: &RunContext,
        table: &'static str,
        row_id: String,
        kind: MutationKind,
        before: Option<&T>,
        after: Option<&T>,
    ) -> Result<()> {
        if self.hooks.is_empty() {
            return Ok(());
        }
        let mutation = Mutation {
            run_id: ctx.run_id,
            table_name: table,
            row_id,
            kind,
            before: before.map(serde_json::to_value).transpose()?,
            after: after.map(serde_json::to_value).transpose()?,
            at: Utc::now(),
        };
        for hook in &self.hooks {
            hook.after_mutation(tx, &mutation).await?;
        }
        Ok(())
    }
}
