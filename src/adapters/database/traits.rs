//! Database abstraction traits
//!
//! This module defines the traits that storage backends must implement to
//! host the warehouse. All engine writes go through a [`WarehouseTransaction`]:
//! a unit of work that either commits as a whole or leaves no trace.

use crate::core::state::watermark::Watermark;
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
use crate::domain::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Outcome of an atomic registry insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryInsert {
    /// The mapping was created by this call
    Inserted,
    /// A mapping already existed; carries the stored id
    Existing(InternalId),
}

/// Post-run integrity and value-range scans
///
/// Each check counts violating rows; zero means the check passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityCheck {
    /// Fact rows whose patient, facility, modality or diagnosis key has no dimension row
    OrphanFactDimensions,
    /// Fact rows whose procedure no longer exists
    FactsWithoutProcedure,
    /// More than one fact row for one procedure
    DuplicateProcedureFacts,
    /// `diagnosis_count` differs from the number of active diagnosis links
    DiagnosisCountMismatch,
    /// Finding or diagnosis link confidence outside [0,1]
    ConfidenceOutOfRange,
    /// Fact quality score outside [0,1]
    QualityScoreOutOfRange,
    /// Negative counts or word counts
    NegativeMeasures,
    /// Reports without a language
    ReportsWithoutLanguage,
}

impl IntegrityCheck {
    /// Every check, in reporting order
    pub const ALL: [IntegrityCheck; 8] = [
        IntegrityCheck::OrphanFactDimensions,
        IntegrityCheck::FactsWithoutProcedure,
        IntegrityCheck::DuplicateProcedureFacts,
        IntegrityCheck::DiagnosisCountMismatch,
        IntegrityCheck::ConfidenceOutOfRange,
        IntegrityCheck::QualityScoreOutOfRange,
        IntegrityCheck::NegativeMeasures,
        IntegrityCheck::ReportsWithoutLanguage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::OrphanFactDimensions => "orphan_fact_dimensions",
            Self::FactsWithoutProcedure => "facts_without_procedure",
            Self::DuplicateProcedureFacts => "duplicate_procedure_facts",
            Self::DiagnosisCountMismatch => "diagnosis_count_mismatch",
            Self::ConfidenceOutOfRange => "confidence_out_of_range",
            Self::QualityScoreOutOfRange => "quality_score_out_of_range",
            Self::NegativeMeasures => "negative_measures",
            Self::ReportsWithoutLanguage => "reports_without_language",
        }
    }

    /// Whether this is a referential-integrity check (as opposed to a value-range check)
    pub fn is_referential(&self) -> bool {
        matches!(
            self,
            Self::OrphanFactDimensions
                | Self::FactsWithoutProcedure
                | Self::DuplicateProcedureFacts
                | Self::DiagnosisCountMismatch
                | Self::ReportsWithoutLanguage
        )
    }
}

/// Warehouse storage backend
///
/// Implementations hand out transactions; every read and write of the engine
/// happens inside one.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Test the database connection
    ///
    /// # Errors
    ///
    /// Returns a `Systemic` error if the backend cannot be reached.
    async fn test_connection(&self) -> Result<()>;

    /// Create schemas and tables if they do not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL cannot be applied.
    async fn ensure_schema(&self) -> Result<()>;

    /// Start a unit of work
    ///
    /// # Errors
    ///
    /// Returns a `Systemic` error if no connection is available.
    async fn begin(&self) -> Result<Box<dyn WarehouseTransaction>>;

    /// Backend name for logs and status output
    fn backend_name(&self) -> &str;
}

/// One unit of work against the warehouse
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// every change made through it.
#[async_trait]
pub trait WarehouseTransaction: Send {
    // ---- reference data ----

    /// Find a reference row by natural code
    async fn find_reference(&mut self, entity: EntityType, code: &str)
        -> Result<Option<ReferenceEntity>>;

    /// Fetch a reference row by id
    async fn get_reference(&mut self, entity: EntityType, id: &ReferenceId)
        -> Result<Option<ReferenceEntity>>;

    /// Insert a reference row unless the code already exists
    ///
    /// Returns `true` if this call created the row. Must be atomic: concurrent
    /// callers with the same unseen code create exactly one row.
    async fn insert_reference_if_absent(
        &mut self,
        entity: EntityType,
        code: &str,
        display: &DisplayFields,
        candidate_id: &ReferenceId,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Reference rows created or updated at or after `since` (all rows when `None`)
    async fn reference_changes(
        &mut self,
        entity: EntityType,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReferenceEntity>>;

    // ---- natural-key registry ----

    /// Look up a registry mapping
    async fn registry_get(&mut self, kind: KeyKind, natural_key: &str)
        -> Result<Option<InternalId>>;

    /// Create a registry mapping unless one already exists
    async fn registry_insert_if_absent(
        &mut self,
        kind: KeyKind,
        natural_key: &str,
        internal_id: &InternalId,
    ) -> Result<RegistryInsert>;

    // ---- operational graph ----

    async fn find_patient(&mut self, code: &PatientCode) -> Result<Option<PatientRow>>;

    async fn get_patient(&mut self, id: &PatientId) -> Result<Option<PatientRow>>;

    /// Insert a patient unless the patient code already exists; returns `true` if inserted
    async fn insert_patient_if_absent(&mut self, patient: &PatientRow) -> Result<bool>;

    /// Atomically add one encounter to the patient's rolling aggregates
    ///
    /// Returns the updated row.
    async fn apply_encounter_rollup(
        &mut self,
        patient_id: &PatientId,
        encounter_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<PatientRow>;

    async fn get_encounter(&mut self, id: &EncounterId) -> Result<Option<EncounterRow>>;

    async fn insert_encounter(&mut self, encounter: &EncounterRow) -> Result<()>;

    async fn insert_procedure(&mut self, procedure: &ProcedureRow) -> Result<()>;

    async fn insert_image(&mut self, image: &ImageRow) -> Result<()>;

    async fn insert_report(&mut self, report: &ReportRow) -> Result<()>;

    async fn insert_finding(&mut self, finding: &FindingRow) -> Result<()>;

    /// Insert a diagnosis link; a duplicate (procedure, diagnosis) pair is an `Integrity` error
    async fn insert_diagnosis_link(&mut self, link: &DiagnosisLinkRow) -> Result<()>;

    // ---- analytics reads ----

    /// Patients created or updated at or after `since` (all when `None`)
    async fn changed_patients(&mut self, since: Option<DateTime<Utc>>) -> Result<Vec<PatientRow>>;

    /// Procedures created or updated at or after `since` (all when `None`)
    async fn changed_procedures(&mut self, since: Option<DateTime<Utc>>)
        -> Result<Vec<ProcedureId>>;

    /// Full operational subtree of each existing procedure; unknown ids are skipped
    async fn load_procedure_graphs(&mut self, ids: &[ProcedureId]) -> Result<Vec<ProcedureGraph>>;

    // ---- analytics writes ----

    /// Upsert a dimension row keyed by its natural reference
    ///
    /// On conflict only descriptive fields change; the surrogate key is kept.
    async fn upsert_dimension(&mut self, row: &DimensionRow) -> Result<SurrogateKey>;

    /// Insert or fully overwrite the fact row of a procedure
    async fn upsert_procedure_fact(&mut self, fact: &FactProcedure) -> Result<()>;

    /// Insert or fully overwrite the language-usage fact of a report
    async fn upsert_language_fact(&mut self, fact: &FactLanguageUsage) -> Result<()>;

    /// Remove all analytics rows and the surrogate entries of the registry
    async fn truncate_analytics(&mut self) -> Result<()>;

    // ---- audit ----

    async fn write_audit_entry(&mut self, entry: &AuditEntry) -> Result<()>;

    async fn write_quality_issues(&mut self, issues: &[QualityIssue]) -> Result<()>;

    async fn write_run_audit(&mut self, record: &RunAuditRecord) -> Result<()>;

    /// Number of rows violating an integrity or value-range check
    async fn count_violations(&mut self, check: IntegrityCheck) -> Result<u64>;

    /// Most recent run summaries, newest first
    async fn recent_runs(&mut self, limit: usize) -> Result<Vec<RunAuditRecord>>;

    /// Row counts of the operational and analytics tables
    async fn table_counts(&mut self) -> Result<Vec<TableCount>>;

    // ---- completion ----

    /// Make every change of this unit of work durable
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every change of this unit of work
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// State storage trait for watermark persistence
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Load a pipeline's watermark
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(Watermark))` if found, `Ok(None)` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails for reasons other than "not found".
    async fn load_watermark(&self, pipeline_name: &str) -> Result<Option<Watermark>>;

    /// Save a watermark
    ///
    /// # Arguments
    ///
    /// * `watermark` - Watermark to save
    /// * `dry_run` - If true, skip the write
    ///
    /// # Errors
    ///
    /// Returns an error if the save operation fails.
    async fn save_watermark(&self, watermark: &Watermark, dry_run: bool) -> Result<()>;

    /// Save a watermark with explicit checkpoint semantics
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails.
    async fn checkpoint(&self, watermark: &Watermark, dry_run: bool) -> Result<()> {
        tracing::info!(
            pipeline = %watermark.pipeline_name,
            checkpoint = ?watermark.last_checkpoint,
            pending = watermark.pending_procedures.len(),
            dry_run,
            "Checkpointing watermark"
        );

        self.save_watermark(watermark, dry_run).await
    }

    /// Get all watermarks from storage
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_all_watermarks(&self) -> Result<Vec<Watermark>>;
}
