//! Batch controller - main orchestrator of a warehouse load
//!
//! A run goes through these steps:
//! 1. Load the pipeline watermark and mark the run as started
//! 2. Resolve the English language once, in its own committed unit of work
//! 3. Catch-up analytics pass from the stored checkpoint (full mode truncates first)
//! 4. Chunks: precheck, operational writes and an analytics pass, then one commit
//! 5. Post-run validation scan
//! 6. Run-audit row and watermark checkpoint
//!
//! A failed chunk is rolled back as a whole and every row in it is reported
//! failed; the run moves on to the next chunk. Only systemic errors stop the run.

use crate::adapters::database::traits::{WarehouseStore, WarehouseTransaction};
use crate::config::WarehouseConfig;
use crate::core::analytics::{AnalyticsTransformer, TransformStats};
use crate::core::batch::chunk::{partition, Chunk};
use crate::core::batch::report::{classify_status, ChunkOutcome, ChunkResult, RunReport};
use crate::core::master::MasterDataResolver;
use crate::core::operational::{AuditTrailHook, OperationalWriter, RunContext};
use crate::core::registry::NaturalKeyRegistry;
use crate::core::state::watermark::Checkpoint;
use crate::core::state::{StateManager, Watermark};
use crate::core::validation::IntegrityValidator;
use crate::domain::audit::{QualityIssue, QualityStage, RunAuditRecord};
use crate::domain::ids::ReferenceId;
use crate::domain::{EncounterRecord, Result, RunMode, RunStatus, WarehouseError};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use uuid::Uuid;

/// Run-level settings of the controller
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub pipeline_name: String,
    pub mode: RunMode,
    /// Chunks processed concurrently
    pub max_parallel_chunks: usize,
    /// Roll back every unit of work instead of committing
    pub dry_run: bool,
    /// Run the integrity scan after the chunks
    pub validate: bool,
    /// Actor recorded in the row change log
    pub actor: String,
}

impl EngineOptions {
    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self {
            pipeline_name: config.engine.pipeline_name.clone(),
            mode: config.engine.mode,
            max_parallel_chunks: config.engine.max_parallel_chunks,
            dry_run: config.application.dry_run,
            validate: config.validation.enabled,
            actor: config.engine.actor.clone(),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pipeline_name: "imaging_warehouse_load".to_string(),
            mode: RunMode::Incremental,
            max_parallel_chunks: 1,
            dry_run: false,
            validate: true,
            actor: "etl".to_string(),
        }
    }
}

/// Why a chunk's unit of work was abandoned
struct ChunkFailure {
    error: WarehouseError,
    /// Batch position of the record whose write raised the error
    offending: Option<usize>,
    /// Precheck issues already collected, by batch position
    prechecked: Vec<(usize, QualityIssue)>,
}

impl ChunkFailure {
    fn new(error: WarehouseError) -> Self {
        Self {
            error,
            offending: None,
            prechecked: Vec::new(),
        }
    }
}

/// Counters of a chunk that reached its commit point
struct ChunkLoad {
    loaded: usize,
    failed: usize,
    duplicates: usize,
    stats: TransformStats,
}

/// State established before the first chunk
struct RunStart {
    watermark: Watermark,
    english: Option<ReferenceId>,
    stats: TransformStats,
    /// The catch-up pass committed, so the checkpoint may advance
    catch_up_ok: bool,
}

/// Orchestrates one load over a batch of records
pub struct BatchController {
    store: Arc<dyn WarehouseStore>,
    state: Arc<StateManager>,
    options: EngineOptions,
    resolver: MasterDataResolver,
    writer: OperationalWriter,
    transformer: AnalyticsTransformer,
    shutdown: Option<watch::Receiver<bool>>,
}

impl BatchController {
    pub fn new(
        store: Arc<dyn WarehouseStore>,
        state: Arc<StateManager>,
        options: EngineOptions,
    ) -> Self {
        let resolver = MasterDataResolver::new();
        let registry = NaturalKeyRegistry::new();
        let writer = OperationalWriter::new(resolver, registry)
            .with_hook(Arc::new(AuditTrailHook::new(options.actor.clone())));

        Self {
            store,
            state,
            options,
            resolver,
            writer,
            transformer: AnalyticsTransformer::new(registry),
            shutdown: None,
        }
    }

    /// Stop starting new chunks once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Load `records` in chunks of `batch_size`
    ///
    /// Row, chunk and systemic failures are reported through the returned
    /// [`RunReport`], never as `Err`.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when `batch_size` is zero.
    pub async fn run(&self, records: Vec<EncounterRecord>, batch_size: usize) -> Result<RunReport> {
        let total = records.len();
        let chunks = partition(records, batch_size)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let mut report = RunReport::new(
            run_id,
            self.options.pipeline_name.clone(),
            self.options.mode,
            self.options.dry_run,
        );

        crate::log_run_start!(
            run_id,
            self.options.pipeline_name,
            self.options.mode,
            total
        );

        let setup = match self.start_run(run_id).await {
            Ok(setup) => setup,
            Err(e) => {
                crate::log_error_with_context!(&e, "run setup failed");
                report.rows_cancelled = total;
                report.chunks_total = chunks.len();
                report.status = RunStatus::Failed;
                report.error_message = Some(e.to_string());
                report.duration = start.elapsed();
                self.write_run_audit(&report, started_at).await;
                report.log_summary();
                return Ok(report);
            }
        };
        let RunStart {
            mut watermark,
            english,
            mut stats,
            catch_up_ok,
        } = setup;

        let abort = AtomicBool::new(false);
        let parallel = self.options.max_parallel_chunks.max(1);
        let mut outcomes: Vec<(ChunkOutcome, TransformStats)> = stream::iter(
            chunks
                .into_iter()
                .map(|chunk| self.process_chunk(chunk, run_id, english, &abort)),
        )
        .buffer_unordered(parallel)
        .collect()
        .await;
        outcomes.sort_by_key(|(outcome, _)| outcome.index);

        let mut systemic_error = None;
        let mut first_chunk_error = None;
        for (outcome, chunk_stats) in outcomes {
            report.add_chunk(&outcome);
            stats.merge(chunk_stats);
            if let ChunkResult::Failed { error, systemic } = outcome.result {
                if systemic && systemic_error.is_none() {
                    systemic_error = Some(error);
                } else if first_chunk_error.is_none() {
                    first_chunk_error = Some(error);
                }
            }
        }

        report.dimension_rows_written = stats.dimension_rows_written;
        report.fact_rows_written = stats.fact_rows_written;
        report.facts_deferred = stats.deferred.len();

        let aborted = systemic_error.is_some();
        let mut validation_passed = true;
        if self.options.validate && !aborted {
            match IntegrityValidator::new(self.store.clone()).validate().await {
                Ok(validation) => {
                    validation_passed = validation.is_success();
                    report.validation = Some(validation);
                }
                Err(e) => {
                    crate::log_error_with_context!(&e, "post-run validation failed");
                    validation_passed = false;
                    if e.is_systemic() {
                        systemic_error = Some(e.to_string());
                    }
                }
            }
        }

        let systemic = systemic_error.is_some();
        report.status = classify_status(
            systemic,
            report.rows_loaded,
            report.rows_failed,
            report.rows_cancelled,
            validation_passed,
        );
        report.error_message = error_message(
            &report,
            systemic_error,
            first_chunk_error,
            validation_passed,
        );
        report.duration = start.elapsed();

        self.write_run_audit(&report, started_at).await;

        if !systemic {
            let high_water = if catch_up_ok { stats.high_water } else { None };
            watermark.advance(
                high_water,
                stats.deferred.clone(),
                report.rows_loaded as u64,
                report.rows_failed as u64,
            );
        }
        if report.status == RunStatus::Failed {
            watermark.mark_failed();
        } else {
            watermark.mark_completed();
        }
        if let Err(e) = self.state.checkpoint(&watermark, self.options.dry_run).await {
            crate::log_error_with_context!(&e, "failed to checkpoint watermark");
        }

        report.log_summary();
        Ok(report)
    }

    /// Watermark, English language and the catch-up analytics pass
    ///
    /// Once the watermark is saved as in progress, any setup failure marks it
    /// failed again before returning.
    async fn start_run(&self, run_id: Uuid) -> Result<RunStart> {
        let dry_run = self.options.dry_run;
        let mut watermark = self.state.load_or_create(&self.options.pipeline_name).await?;
        watermark.mark_started(run_id);
        self.state.save_watermark(&watermark, dry_run).await?;

        match self.prepare(&watermark, run_id).await {
            Ok((english, stats, catch_up_ok)) => Ok(RunStart {
                watermark,
                english,
                stats,
                catch_up_ok,
            }),
            Err(e) => {
                watermark.mark_failed();
                if let Err(save) = self.state.checkpoint(&watermark, dry_run).await {
                    crate::log_error_with_context!(&save, "failed to mark watermark failed");
                }
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        watermark: &Watermark,
        run_id: Uuid,
    ) -> Result<(Option<ReferenceId>, TransformStats, bool)> {
        // A dry run rolls this back, so each chunk resolves English itself
        let english = if self.options.dry_run {
            None
        } else {
            let mut tx = self.store.begin().await?;
            let english = self.resolver.resolve_english(tx.as_mut()).await?;
            tx.commit().await?;
            Some(english)
        };

        let checkpoint = match self.options.mode {
            RunMode::Full => Checkpoint::full(),
            RunMode::Incremental => watermark.checkpoint(),
        };

        let mut tx = self.store.begin().await?;
        match self.catch_up(tx.as_mut(), &checkpoint, run_id).await {
            Ok(stats) => {
                self.finish(tx).await?;
                tracing::info!(
                    run_id = %run_id,
                    mode = %self.options.mode,
                    facts = stats.fact_rows_written,
                    deferred = stats.deferred.len(),
                    "Catch-up analytics pass finished"
                );
                Ok((english, stats, true))
            }
            Err(e) => {
                rollback_quietly(tx).await;
                if e.is_systemic() {
                    return Err(e);
                }
                crate::log_error_with_context!(&e, "catch-up analytics pass rolled back");
                // Keep the procedures that were pending so the next run retries them
                let stats = TransformStats {
                    deferred: checkpoint.pending.clone(),
                    ..TransformStats::default()
                };
                Ok((english, stats, false))
            }
        }
    }

    async fn catch_up(
        &self,
        tx: &mut dyn WarehouseTransaction,
        checkpoint: &Checkpoint,
        run_id: Uuid,
    ) -> Result<TransformStats> {
        if self.options.mode == RunMode::Full {
            tracing::info!("Full mode: truncating analytics tables");
            tx.truncate_analytics().await?;
        }
        self.transformer
            .populate_from_operational(tx, checkpoint, run_id)
            .await
    }

    /// Commit, or roll back in a dry run
    async fn finish(&self, tx: Box<dyn WarehouseTransaction>) -> Result<()> {
        if self.options.dry_run {
            tx.rollback().await
        } else {
            tx.commit().await
        }
    }

    async fn process_chunk(
        &self,
        chunk: Chunk,
        run_id: Uuid,
        english: Option<ReferenceId>,
        abort: &AtomicBool,
    ) -> (ChunkOutcome, TransformStats) {
        if self.is_shutdown_requested() {
            tracing::info!(chunk = chunk.index, "Shutdown requested, chunk not started");
            return (
                ChunkOutcome::cancelled(chunk.index, chunk.len(), true),
                TransformStats::default(),
            );
        }
        if abort.load(Ordering::SeqCst) {
            return (
                ChunkOutcome::cancelled(chunk.index, chunk.len(), false),
                TransformStats::default(),
            );
        }

        match self.load_chunk(&chunk, run_id, english).await {
            Ok(load) => {
                let result = if self.options.dry_run {
                    ChunkResult::RolledBackDryRun
                } else {
                    ChunkResult::Committed
                };
                let outcome = ChunkOutcome {
                    index: chunk.index,
                    rows_loaded: load.loaded,
                    rows_failed: load.failed,
                    rows_cancelled: 0,
                    duplicates_skipped: load.duplicates,
                    result,
                };
                crate::log_chunk_outcome!(chunk.index, outcome.label(), load.loaded, load.failed);
                (outcome, load.stats)
            }
            Err(failure) => {
                let systemic = failure.error.is_systemic();
                if systemic {
                    abort.store(true, Ordering::SeqCst);
                }
                let outcome = ChunkOutcome::failed(
                    chunk.index,
                    chunk.len(),
                    failure.error.to_string(),
                    systemic,
                );
                self.record_chunk_failure(&chunk, failure, run_id).await;
                crate::log_chunk_outcome!(chunk.index, outcome.label(), 0usize, chunk.len());
                (outcome, TransformStats::default())
            }
        }
    }

    /// One unit of work: precheck, writes, analytics pass, commit
    async fn load_chunk(
        &self,
        chunk: &Chunk,
        run_id: Uuid,
        english: Option<ReferenceId>,
    ) -> std::result::Result<ChunkLoad, ChunkFailure> {
        let chunk_start = Utc::now();
        let mut tx = self.store.begin().await.map_err(ChunkFailure::new)?;

        match self
            .fill_chunk(tx.as_mut(), chunk, run_id, english, chunk_start)
            .await
        {
            Ok(load) => {
                self.finish(tx).await.map_err(ChunkFailure::new)?;
                Ok(load)
            }
            Err(failure) => {
                rollback_quietly(tx).await;
                Err(failure)
            }
        }
    }

    async fn fill_chunk(
        &self,
        tx: &mut dyn WarehouseTransaction,
        chunk: &Chunk,
        run_id: Uuid,
        english: Option<ReferenceId>,
        chunk_start: DateTime<Utc>,
    ) -> std::result::Result<ChunkLoad, ChunkFailure> {
        let mut prechecked: Vec<(usize, QualityIssue)> = Vec::new();

        let english = match english {
            Some(id) => id,
            None => self
                .resolver
                .resolve_english(tx)
                .await
                .map_err(ChunkFailure::new)?,
        };
        let ctx = RunContext::new(run_id, english);

        let mut loaded = 0;
        let mut duplicates = 0;
        for (position, record) in chunk.positioned() {
            if let Err(e) = record.validate() {
                tracing::warn!(
                    record = %record.record_key(),
                    error = %e,
                    "Record failed precheck"
                );
                prechecked.push((
                    position,
                    QualityIssue::from_error(
                        run_id,
                        QualityStage::Precheck,
                        record.record_key(),
                        &e,
                        record.patient.is_synthetic,
                    ),
                ));
                continue;
            }

            match self
                .writer
                .write_encounter(tx, &ctx, &record.patient, &record.facility, &record.encounter)
                .await
            {
                Ok(outcome) => {
                    loaded += 1;
                    if !outcome.created {
                        duplicates += 1;
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        chunk = chunk.index,
                        record = %record.record_key(),
                        error = %error,
                        "Write failed, rolling back chunk"
                    );
                    return Err(ChunkFailure {
                        error,
                        offending: Some(position),
                        prechecked,
                    });
                }
            }
        }

        let stats = match self
            .transformer
            .populate_from_operational(tx, &Checkpoint::since(chunk_start), run_id)
            .await
        {
            Ok(stats) => stats,
            Err(error) => {
                return Err(ChunkFailure {
                    error,
                    offending: None,
                    prechecked,
                })
            }
        };

        let failed = prechecked.len();
        if !prechecked.is_empty() {
            let issues: Vec<QualityIssue> = prechecked.iter().map(|(_, i)| i.clone()).collect();
            if let Err(error) = tx.write_quality_issues(&issues).await {
                return Err(ChunkFailure {
                    error,
                    offending: None,
                    prechecked,
                });
            }
        }

        Ok(ChunkLoad {
            loaded,
            failed,
            duplicates,
            stats,
        })
    }

    /// One quality-log entry per row of a rolled-back chunk
    async fn record_chunk_failure(&self, chunk: &Chunk, failure: ChunkFailure, run_id: Uuid) {
        let ChunkFailure {
            error,
            offending,
            prechecked,
        } = failure;

        let rolled_back = WarehouseError::Other(format!(
            "rolled back with chunk {}: {error}",
            chunk.index
        ));
        let issues: Vec<QualityIssue> = chunk
            .positioned()
            .map(|(position, record)| {
                if let Some((_, issue)) = prechecked.iter().find(|(p, _)| *p == position) {
                    return issue.clone();
                }
                let cause = if offending == Some(position) {
                    &error
                } else {
                    &rolled_back
                };
                QualityIssue::from_error(
                    run_id,
                    QualityStage::Operational,
                    record.record_key(),
                    cause,
                    record.patient.is_synthetic,
                )
            })
            .collect();

        if self.options.dry_run {
            tracing::debug!(
                chunk = chunk.index,
                issues = issues.len(),
                "Dry run: quality issues not written"
            );
            return;
        }

        let written = async {
            let mut tx = self.store.begin().await?;
            tx.write_quality_issues(&issues).await?;
            tx.commit().await
        }
        .await;
        if let Err(e) = written {
            crate::log_error_with_context!(&e, "failed to write quality issues for rolled-back chunk");
        }
    }

    /// Persist the run summary row, unless this is a dry run
    async fn write_run_audit(&self, report: &RunReport, started_at: DateTime<Utc>) {
        if self.options.dry_run {
            return;
        }

        let record = RunAuditRecord {
            run_id: report.run_id,
            pipeline_name: report.pipeline_name.clone(),
            mode: report.mode,
            started_at,
            finished_at: Utc::now(),
            duration_ms: report.duration.as_millis() as i64,
            rows_loaded: report.rows_loaded as i64,
            rows_failed: report.rows_failed as i64,
            status: report.status,
            error_message: report.error_message.clone(),
        };

        let written = async {
            let mut tx = self.store.begin().await?;
            tx.write_run_audit(&record).await?;
            tx.commit().await
        }
        .await;
        if let Err(e) = written {
            crate::log_error_with_context!(&e, "failed to write run audit record");
        }
    }
}

async fn rollback_quietly(tx: Box<dyn WarehouseTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

fn error_message(
    report: &RunReport,
    systemic_error: Option<String>,
    first_chunk_error: Option<String>,
    validation_passed: bool,
) -> Option<String> {
    if let Some(error) = systemic_error {
        return Some(format!("run aborted: {error}"));
    }
    if let Some(error) = first_chunk_error {
        return Some(format!(
            "{} chunk(s) rolled back; first error: {error}",
            report.chunks_failed
        ));
    }
    if report.rows_failed > 0 {
        return Some(format!("{} record(s) failed precheck", report.rows_failed));
    }
    if report.interrupted {
        return Some(format!(
            "interrupted; {} record(s) not processed",
            report.rows_cancelled
        ));
    }
    if !validation_passed {
        let violations = report
            .validation
            .as_ref()
            .map_or(0, |v| v.total_violations());
        return Some(format!("validation found {violations} violation(s)"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::records::{
        DiagnosisSpec, EncounterSpec, FacilitySpec, ImageSpec, PatientSpec, ProcedureSpec,
    };
    use chrono::TimeZone;

    fn record(n: usize) -> EncounterRecord {
        EncounterRecord {
            patient: PatientSpec {
                patient_code: format!("PAT{n:06}"),
                sex: Some("F".to_string()),
                date_of_birth: chrono::NaiveDate::from_ymd_opt(1967, 3, 18),
                reported_age: None,
                height_cm: None,
                weight_kg: None,
                geographic_location: None,
                is_synthetic: true,
            },
            facility: FacilitySpec {
                code: Some("TEACHING_HOSPITAL".to_string()),
                name: "Teaching Hospital".to_string(),
                location: None,
                facility_type: None,
            },
            encounter: EncounterSpec {
                encounter_code: format!("ENC{n:06}"),
                encounter_at: Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap(),
                referring_physician: None,
                notes: None,
                procedures: vec![ProcedureSpec {
                    modality_code: "RF".to_string(),
                    projection_code: Some("PA".to_string()),
                    images: vec![ImageSpec {
                        image_code: format!("IMG{n:06}"),
                        path: format!("images/IMG{n:06}.png"),
                        study_id: None,
                    }],
                    diagnoses: vec![DiagnosisSpec {
                        name: "Normal".to_string(),
                        confidence: 0.9,
                    }],
                    ..ProcedureSpec::default()
                }],
            },
        }
    }

    fn controller(store: &MemoryStore, options: EngineOptions) -> BatchController {
        BatchController::new(
            Arc::new(store.clone()),
            Arc::new(StateManager::new_with_storage(Arc::new(store.clone()))),
            options,
        )
    }

    #[tokio::test]
    async fn test_run_loads_all_chunks() {
        let store = MemoryStore::new();
        let records = (0..25).map(record).collect();

        let report = controller(&store, EngineOptions::default())
            .run(records, 10)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.rows_loaded, 25);
        assert_eq!(report.chunks_total, 3);
        assert_eq!(report.fact_rows_written, 25);
        assert!(report.validation.as_ref().unwrap().is_success());

        let (facts, runs) = store
            .inspect(|t| (t.procedure_facts.len(), t.run_log.len()))
            .await;
        assert_eq!(facts, 25);
        assert_eq!(runs, 1);
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_configuration_error() {
        let store = MemoryStore::new();
        let err = controller(&store, EngineOptions::default())
            .run(vec![record(0)], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_precheck_failure_fails_only_that_record() {
        let store = MemoryStore::new();
        let mut bad = record(1);
        bad.encounter.encounter_code = "  ".to_string();

        let report = controller(&store, EngineOptions::default())
            .run(vec![record(0), bad, record(2)], 10)
            .await
            .unwrap();

        assert_eq!(report.rows_loaded, 2);
        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.chunks_failed, 0);
        assert_eq!(report.status, RunStatus::Partial);

        let issues = store.inspect(|t| t.quality_log.clone()).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].stage, QualityStage::Precheck);
    }

    #[tokio::test]
    async fn test_dry_run_commits_nothing() {
        let store = MemoryStore::new();
        let options = EngineOptions {
            dry_run: true,
            ..EngineOptions::default()
        };

        let report = controller(&store, options)
            .run((0..5).map(record).collect(), 2)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.rows_loaded, 5);
        let (patients, runs) = store
            .inspect(|t| (t.patients.len(), t.run_log.len()))
            .await;
        assert_eq!(patients, 0);
        assert_eq!(runs, 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_cancels_chunks() {
        let store = MemoryStore::new();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = controller(&store, EngineOptions::default())
            .with_shutdown(rx)
            .run((0..4).map(record).collect(), 2)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.rows_cancelled, 4);
        assert_eq!(report.rows_loaded, 0);
        assert_eq!(report.status, RunStatus::Partial);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_run() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let report = controller(&store, EngineOptions::default())
            .run((0..3).map(record).collect(), 2)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.rows_cancelled, 3);
        assert!(report.error_message.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_setup_failure_marks_watermark_failed() {
        let warehouse = MemoryStore::new();
        let state_store = MemoryStore::new();
        let state = Arc::new(StateManager::new_with_storage(Arc::new(state_store.clone())));
        warehouse.set_unavailable(true);

        let controller =
            BatchController::new(Arc::new(warehouse.clone()), state.clone(), EngineOptions::default());
        let report = controller
            .run((0..2).map(record).collect(), 2)
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Failed);

        let watermark = state
            .load_watermark("imaging_warehouse_load")
            .await
            .unwrap()
            .unwrap();
        assert!(watermark.is_failed());
        assert!(!watermark.is_in_progress());
        assert_eq!(watermark.last_run_id, Some(report.run_id));
        assert!(watermark.last_run_completed_at.is_some());
    }
}
