//! Analytics transformer
//!
//! Populates the star schema from committed operational rows. Dimensions are
//! upserted first, then facts, because facts only carry surrogate keys. A fact
//! whose dimension is missing is deferred: it is logged to the quality log and
//! retried by the next pass instead of failing the unit of work.

use crate::adapters::database::traits::WarehouseTransaction;
use crate::core::analytics::derive;
use crate::core::registry::NaturalKeyRegistry;
use crate::core::state::watermark::Checkpoint;
use crate::domain::analytics::{
    date_key, DimDate, DimDiagnosis, DimFacility, DimModality, DimPatient, DimensionRow,
    FactLanguageUsage, FactProcedure,
};
use crate::domain::audit::{QualityIssue, QualityStage};
use crate::domain::ids::{InternalId, KeyKind, ProcedureId, ReferenceId, SurrogateKey};
use crate::domain::operational::{PatientRow, ProcedureGraph};
use crate::domain::reference::{EntityType, ReferenceEntity};
use crate::domain::{Result, WarehouseError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use uuid::Uuid;

/// Counters of one transformer pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformStats {
    pub dimension_rows_written: u64,
    pub fact_rows_written: u64,
    pub language_facts_written: u64,
    /// Procedures whose facts could not be built yet
    pub deferred: Vec<ProcedureId>,
    /// Latest `updated_at` seen among the rows read
    pub high_water: Option<DateTime<Utc>>,
}

impl TransformStats {
    /// Fold the counters of another pass into this one
    pub fn merge(&mut self, other: TransformStats) {
        self.dimension_rows_written += other.dimension_rows_written;
        self.fact_rows_written += other.fact_rows_written;
        self.language_facts_written += other.language_facts_written;
        for id in other.deferred {
            if !self.deferred.contains(&id) {
                self.deferred.push(id);
            }
        }
        self.high_water = match (self.high_water, other.high_water) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    fn observe(&mut self, at: DateTime<Utc>) {
        self.high_water = Some(self.high_water.map_or(at, |hw| hw.max(at)));
    }
}

/// Surrogate keys a fact row needs
struct FactKeys {
    patient: SurrogateKey,
    facility: SurrogateKey,
    modality: SurrogateKey,
    diagnosis: Option<SurrogateKey>,
}

/// Star-schema builder
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsTransformer {
    registry: NaturalKeyRegistry,
}

impl AnalyticsTransformer {
    pub fn new(registry: NaturalKeyRegistry) -> Self {
        Self { registry }
    }

    /// Upsert dimensions and facts for everything changed since `checkpoint`
    ///
    /// Procedures listed as pending in the checkpoint are rebuilt as well,
    /// whatever their `updated_at`. Missing dimensions produce one ERROR
    /// quality issue per procedure, written through `tx`.
    ///
    /// # Errors
    ///
    /// Storage failures propagate; a missing dimension does not.
    pub async fn populate_from_operational(
        &self,
        tx: &mut dyn WarehouseTransaction,
        checkpoint: &Checkpoint,
        run_id: Uuid,
    ) -> Result<TransformStats> {
        let since = checkpoint.since;
        let mut stats = TransformStats::default();

        // Dimensions
        for patient in tx.changed_patients(since).await? {
            stats.observe(patient.updated_at);
            self.upsert_patient_dimension(tx, &patient).await?;
            stats.dimension_rows_written += 1;
        }

        for entity in [EntityType::Facility, EntityType::Modality, EntityType::Diagnosis] {
            for reference in tx.reference_changes(entity, since).await? {
                stats.observe(reference.updated_at);
                self.upsert_reference_dimension(tx, &reference).await?;
                stats.dimension_rows_written += 1;
            }
        }

        let mut ids = tx.changed_procedures(since).await?;
        let mut seen: HashSet<ProcedureId> = ids.iter().copied().collect();
        for id in &checkpoint.pending {
            if seen.insert(*id) {
                ids.push(*id);
            }
        }
        let graphs = tx.load_procedure_graphs(&ids).await?;

        let dates: BTreeSet<_> = graphs
            .iter()
            .map(|g| g.encounter.encounter_at.date_naive())
            .collect();
        for date in dates {
            tx.upsert_dimension(&DimensionRow::Date(DimDate::from_date(date)))
                .await?;
            stats.dimension_rows_written += 1;
        }

        // Facts
        let mut languages: BTreeMap<ReferenceId, Option<ReferenceEntity>> = BTreeMap::new();
        let mut issues = Vec::new();
        for graph in &graphs {
            stats.observe(graph.procedure.updated_at);

            let keys = match self.fact_keys(tx, graph).await? {
                Ok(keys) => keys,
                Err(missing) => {
                    let err = WarehouseError::DependencyOrdering(format!(
                        "procedure '{}' deferred: {missing}",
                        graph.procedure.procedure_code
                    ));
                    tracing::warn!(
                        procedure = %graph.procedure.procedure_code,
                        missing = %missing,
                        "Fact deferred until its dimension exists"
                    );
                    issues.push(QualityIssue::from_error(
                        run_id,
                        QualityStage::Analytics,
                        graph.procedure.procedure_code.clone(),
                        &err,
                        graph.patient.is_synthetic,
                    ));
                    stats.deferred.push(graph.procedure.id);
                    continue;
                }
            };

            let fact = self.build_fact(tx, graph, &keys).await?;
            tx.upsert_procedure_fact(&fact).await?;
            stats.fact_rows_written += 1;

            for report in &graph.reports {
                let language = cached_language(tx, &mut languages, report.language_id).await?;
                let audio = match report.audio_language_id {
                    Some(id) => cached_language(tx, &mut languages, id).await?,
                    None => None,
                };
                let language = language.ok_or_else(|| {
                    WarehouseError::Integrity(format!(
                        "report {} references missing language {}",
                        report.id, report.language_id
                    ))
                })?;

                tx.upsert_language_fact(&FactLanguageUsage {
                    report_id: report.id,
                    procedure_id: graph.procedure.id,
                    patient_sk: keys.patient,
                    facility_sk: keys.facility,
                    date_key: fact.date_key,
                    language_code: language.code.clone(),
                    language_name: language.display.name.clone(),
                    audio_language_code: audio.as_ref().map(|a| a.code.clone()),
                    audio_language_name: audio.as_ref().map(|a| a.display.name.clone()),
                    has_audio: report.has_audio,
                    word_count: report.word_count,
                    loaded_at: fact.loaded_at,
                })
                .await?;
                stats.language_facts_written += 1;
            }
        }

        if !issues.is_empty() {
            tx.write_quality_issues(&issues).await?;
        }

        tracing::debug!(
            dimensions = stats.dimension_rows_written,
            facts = stats.fact_rows_written,
            language_facts = stats.language_facts_written,
            deferred = stats.deferred.len(),
            "Analytics pass complete"
        );
        Ok(stats)
    }

    async fn upsert_patient_dimension(
        &self,
        tx: &mut dyn WarehouseTransaction,
        patient: &PatientRow,
    ) -> Result<()> {
        let row = DimensionRow::Patient(DimPatient {
            patient_code: patient.patient_code.clone(),
            patient_id: patient.id,
            sex: patient.sex.clone(),
            date_of_birth: patient.date_of_birth,
            geographic_location: patient.geographic_location.clone(),
            first_encounter_date: patient.first_encounter_date,
            last_encounter_date: patient.last_encounter_date,
            total_encounters: patient.total_encounters,
            is_synthetic: patient.is_synthetic,
        });
        self.upsert_registered(tx, &row).await
    }

    async fn upsert_reference_dimension(
        &self,
        tx: &mut dyn WarehouseTransaction,
        reference: &ReferenceEntity,
    ) -> Result<()> {
        let row = match reference.entity_type {
            EntityType::Facility => DimensionRow::Facility(DimFacility {
                facility_id: reference.id,
                facility_code: reference.code.clone(),
                facility_name: reference.display.name.clone(),
                location: reference.display.attribute("location").map(str::to_string),
                facility_type: reference
                    .display
                    .attribute("facility_type")
                    .map(str::to_string),
            }),
            EntityType::Modality => DimensionRow::Modality(DimModality {
                modality_id: reference.id,
                modality_code: reference.code.clone(),
                modality_name: reference.display.name.clone(),
            }),
            EntityType::Diagnosis => DimensionRow::Diagnosis(DimDiagnosis {
                diagnosis_id: reference.id,
                diagnosis_code: reference.code.clone(),
                diagnosis_name: reference.display.name.clone(),
                category: reference
                    .display
                    .attribute("category")
                    .unwrap_or("Other")
                    .to_string(),
            }),
            other => {
                return Err(WarehouseError::Resolution(format!(
                    "{other} has no analytics dimension"
                )))
            }
        };
        self.upsert_registered(tx, &row).await
    }

    /// Upsert a dimension and record its surrogate key in the registry
    async fn upsert_registered(
        &self,
        tx: &mut dyn WarehouseTransaction,
        row: &DimensionRow,
    ) -> Result<()> {
        let sk = tx.upsert_dimension(row).await?;
        if let Some(kind) = row.kind().registry_kind() {
            self.registry
                .register(tx, kind, &row.natural_ref(), InternalId::from(sk))
                .await?;
        }
        Ok(())
    }

    /// Surrogate keys of the fact, or a description of the first missing one
    async fn fact_keys(
        &self,
        tx: &mut dyn WarehouseTransaction,
        graph: &ProcedureGraph,
    ) -> Result<std::result::Result<FactKeys, String>> {
        let patient_ref = graph.patient.patient_code.to_string();
        let Some(patient) = self.surrogate(tx, KeyKind::DimPatient, &patient_ref).await? else {
            return Ok(Err(format!("dim_patient '{patient_ref}'")));
        };

        let facility_ref = graph.encounter.facility_id.to_string();
        let Some(facility) = self.surrogate(tx, KeyKind::DimFacility, &facility_ref).await? else {
            return Ok(Err(format!("dim_facility '{facility_ref}'")));
        };

        let modality_ref = graph.procedure.modality_id.to_string();
        let Some(modality) = self.surrogate(tx, KeyKind::DimModality, &modality_ref).await? else {
            return Ok(Err(format!("dim_modality '{modality_ref}'")));
        };

        let diagnosis = match derive::primary_link(&graph.links) {
            Some(link) => {
                let diagnosis_ref = link.diagnosis_id.to_string();
                match self.surrogate(tx, KeyKind::DimDiagnosis, &diagnosis_ref).await? {
                    Some(sk) => Some(sk),
                    None => return Ok(Err(format!("dim_diagnosis '{diagnosis_ref}'"))),
                }
            }
            None => None,
        };

        Ok(Ok(FactKeys {
            patient,
            facility,
            modality,
            diagnosis,
        }))
    }

    async fn surrogate(
        &self,
        tx: &mut dyn WarehouseTransaction,
        kind: KeyKind,
        natural_ref: &str,
    ) -> Result<Option<SurrogateKey>> {
        match self.registry.try_lookup(tx, kind, natural_ref).await? {
            Some(InternalId::Surrogate(key)) => Ok(Some(SurrogateKey::new(key))),
            Some(InternalId::Record(id)) => Err(WarehouseError::Integrity(format!(
                "{kind} '{natural_ref}' is registered to record {id}"
            ))),
            None => Ok(None),
        }
    }

    async fn build_fact(
        &self,
        tx: &mut dyn WarehouseTransaction,
        graph: &ProcedureGraph,
        keys: &FactKeys,
    ) -> Result<FactProcedure> {
        let encounter_date = graph.encounter.encounter_at.date_naive();

        let projection_name = match &graph.procedure.projection_id {
            Some(id) => tx
                .get_reference(EntityType::Projection, id)
                .await?
                .map(|r| r.display.name),
            None => None,
        };
        let region_name = match &graph.procedure.region_id {
            Some(id) => tx
                .get_reference(EntityType::AnatomicalRegion, id)
                .await?
                .map(|r| r.display.name),
            None => None,
        };

        Ok(FactProcedure {
            procedure_id: graph.procedure.id,
            procedure_code: graph.procedure.procedure_code.clone(),
            patient_sk: keys.patient,
            facility_sk: keys.facility,
            modality_sk: keys.modality,
            diagnosis_sk: keys.diagnosis,
            date_key: date_key(encounter_date),
            projection_name,
            region_name,
            age_at_encounter: derive::age_at(graph.patient.date_of_birth, encounter_date),
            finding_severity: derive::max_severity(&graph.findings),
            is_abnormal: derive::is_abnormal(&graph.findings),
            diagnosis_count: derive::diagnosis_count(&graph.links),
            total_images: derive::total_images(graph),
            report_word_count: derive::report_word_count(graph),
            quality_score: derive::quality_score(graph),
            loaded_at: Utc::now(),
        })
    }
}

async fn cached_language(
    tx: &mut dyn WarehouseTransaction,
    cache: &mut BTreeMap<ReferenceId, Option<ReferenceEntity>>,
    id: ReferenceId,
) -> Result<Option<ReferenceEntity>> {
    if let Some(hit) = cache.get(&id) {
        return Ok(hit.clone());
    }
    let found = tx.get_reference(EntityType::Language, &id).await?;
    cache.insert(id, found.clone());
    Ok(found)
}
