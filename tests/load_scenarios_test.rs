//! End-to-end load scenarios on the in-memory store
//!
//! These tests drive the batch controller through its public API and
//! inspect every schema afterwards.

mod common;

use chrono::NaiveDate;
use common::{controller, options, record, records, state};
use imaging_warehouse::adapters::memory::MemoryStore;
use imaging_warehouse::core::batch::EngineOptions;
use imaging_warehouse::domain::records::DiagnosisSpec;
use imaging_warehouse::domain::{EntityType, ErrorClass, QualityStage, RunMode, RunStatus};

#[tokio::test]
async fn test_single_record_populates_every_schema() {
    let store = MemoryStore::new();

    let report = controller(&store, options())
        .run(vec![record(0)], 500)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.rows_loaded, 1);
    assert_eq!(report.rows_failed, 0);
    assert!(report.validation.as_ref().unwrap().is_success());

    store
        .inspect(|t| {
            assert_eq!(t.patients.len(), 1);
            assert_eq!(t.encounters.len(), 1);
            assert_eq!(t.procedures.len(), 1);
            assert_eq!(t.images.len(), 1);
            assert_eq!(t.reports.len(), 1);
            assert_eq!(t.findings.len(), 1);
            assert_eq!(t.links.len(), 1);

            let (_, dim) = &t.dim_patient["PAT000000"];
            assert_eq!(dim.total_encounters, 1);
            assert_eq!(dim.sex.as_deref(), Some("F"));

            assert_eq!(t.procedure_facts.len(), 1);
            let fact = t.procedure_facts.values().next().unwrap();
            // Born 1967-03-18, seen 2024-05-02
            assert_eq!(fact.age_at_encounter, Some(57));
            assert_eq!(fact.date_key, 20240502);
            assert_eq!(fact.total_images, 1);
            assert_eq!(fact.diagnosis_count, 1);
            assert!(fact.diagnosis_sk.is_some());
            assert!(fact.report_word_count > 0);

            assert_eq!(t.language_facts.len(), 1);
            assert!(t.dim_date.contains_key(&20240502));
            assert_eq!(t.run_log.len(), 1);
            assert!(t.quality_log.is_empty());
            assert!(!t.change_log.is_empty());
        })
        .await;
}

#[tokio::test]
async fn test_report_without_language_defaults_to_english() {
    let store = MemoryStore::new();
    controller(&store, options())
        .run(vec![record(0)], 500)
        .await
        .unwrap();

    store
        .inspect(|t| {
            let english = &t.references[&(EntityType::Language, "en".to_string())];
            assert_eq!(t.reports[0].language_id, english.id);
            assert!(!t.reports[0].has_audio);

            let fact = t.language_facts.values().next().unwrap();
            assert_eq!(fact.language_code, "en");
            assert!(fact.audio_language_code.is_none());
        })
        .await;
}

#[tokio::test]
async fn test_second_encounter_updates_patient_dimension() {
    let store = MemoryStore::new();
    let first = record(0);
    let mut second = record(0);
    second.encounter.encounter_code = "ENC000000-B".to_string();
    second.encounter.encounter_at = first.encounter.encounter_at + chrono::Duration::days(30);
    second.encounter.procedures[0].images[0].image_code = "IMG000000-B".to_string();

    controller(&store, options())
        .run(vec![first], 500)
        .await
        .unwrap();
    let report = controller(&store, options())
        .run(vec![second], 500)
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Success);

    store
        .inspect(|t| {
            assert_eq!(t.patients.len(), 1);
            assert_eq!(t.encounters.len(), 2);
            let (_, dim) = &t.dim_patient["PAT000000"];
            assert_eq!(dim.total_encounters, 2);
            assert_eq!(dim.last_encounter_date, NaiveDate::from_ymd_opt(2024, 6, 1));
            assert_eq!(dim.first_encounter_date, NaiveDate::from_ymd_opt(2024, 5, 2));
            assert_eq!(t.procedure_facts.len(), 2);
        })
        .await;
}

#[tokio::test]
async fn test_bad_record_fails_whole_batch_when_batch_is_one_chunk() {
    let store = MemoryStore::new();
    let mut batch = records(2000);
    batch[1500].encounter.procedures[0].findings[0].confidence = 1.5;

    let report = controller(&store, options()).run(batch, 2000).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.rows_loaded, 0);
    assert_eq!(report.rows_failed, 2000);
    assert_eq!(report.chunks_failed, 1);

    store
        .inspect(|t| {
            assert!(t.encounters.is_empty());
            assert!(t.procedure_facts.is_empty());
            assert_eq!(t.quality_log.len(), 2000);

            let offending: Vec<_> = t
                .quality_log
                .iter()
                .filter(|i| i.error_class == ErrorClass::ValueRange)
                .collect();
            assert_eq!(offending.len(), 1);
            assert_eq!(offending[0].record_key, "PAT001500/ENC001500");
            assert_eq!(offending[0].stage, QualityStage::Operational);
        })
        .await;
}

#[tokio::test]
async fn test_bad_record_fails_only_its_chunk() {
    let store = MemoryStore::new();
    let mut batch = records(2000);
    batch[1500].encounter.procedures[0].findings[0].confidence = 1.5;

    let report = controller(&store, options()).run(batch, 500).await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.rows_loaded, 1500);
    assert_eq!(report.rows_failed, 500);
    assert_eq!(report.chunks_total, 4);
    assert_eq!(report.chunks_failed, 1);
    assert!(report.error_message.as_deref().unwrap().contains("rolled back"));

    store
        .inspect(|t| {
            assert_eq!(t.encounters.len(), 1500);
            assert_eq!(t.procedure_facts.len(), 1500);
            assert_eq!(t.quality_log.len(), 500);
            assert!(!t.encounter_codes.contains("ENC001500"));
            assert!(!t.encounter_codes.contains("ENC001999"));
            assert!(t.encounter_codes.contains("ENC001499"));
        })
        .await;
}

#[tokio::test]
async fn test_rerun_skips_loaded_encounters() {
    let store = MemoryStore::new();

    controller(&store, options())
        .run(records(30), 10)
        .await
        .unwrap();
    let report = controller(&store, options())
        .run(records(30), 10)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.rows_loaded, 30);
    assert_eq!(report.duplicates_skipped, 30);

    store
        .inspect(|t| {
            assert_eq!(t.encounters.len(), 30);
            assert_eq!(t.procedures.len(), 30);
            assert_eq!(t.procedure_facts.len(), 30);
            assert_eq!(t.run_log.len(), 2);
        })
        .await;

    let watermark = state(&store)
        .load_watermark("imaging_warehouse_load")
        .await
        .unwrap()
        .unwrap();
    assert!(watermark.is_completed());
    assert_eq!(watermark.total_rows_loaded, 60);
}

#[tokio::test]
async fn test_diagnosis_count_and_score_ranges() {
    let store = MemoryStore::new();
    let mut rec = record(0);
    rec.encounter.procedures[0].diagnoses = vec![
        DiagnosisSpec {
            name: "Pleural Effusion".to_string(),
            confidence: 0.8,
        },
        DiagnosisSpec {
            name: "Cardiomegaly".to_string(),
            confidence: 0.6,
        },
    ];

    controller(&store, options())
        .run(vec![rec, record(1)], 500)
        .await
        .unwrap();

    store
        .inspect(|t| {
            let counts: Vec<i32> = t
                .procedure_facts
                .values()
                .map(|f| f.diagnosis_count)
                .collect();
            assert!(counts.contains(&2));
            assert!(counts.contains(&1));

            for fact in t.procedure_facts.values() {
                assert!((0.0..=1.0).contains(&fact.quality_score));
            }
            for link in &t.links {
                assert!((0.0..=1.0).contains(&link.confidence));
            }
            assert_eq!(t.links.iter().filter(|l| l.is_primary).count(), 2);
        })
        .await;
}

#[tokio::test]
async fn test_full_mode_rebuilds_analytics() {
    let store = MemoryStore::new();
    controller(&store, options())
        .run(records(5), 500)
        .await
        .unwrap();

    let full = EngineOptions {
        mode: RunMode::Full,
        ..options()
    };
    let report = controller(&store, full).run(Vec::new(), 500).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.fact_rows_written, 5);
    store
        .inspect(|t| {
            assert_eq!(t.procedure_facts.len(), 5);
            assert_eq!(t.dim_patient.len(), 5);
        })
        .await;
}

#[tokio::test]
async fn test_parallel_chunks_load_everything() {
    let store = MemoryStore::new();
    let parallel = EngineOptions {
        max_parallel_chunks: 4,
        ..options()
    };

    let report = controller(&store, parallel)
        .run(records(100), 10)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.rows_loaded, 100);
    assert_eq!(report.chunks_total, 10);
    store
        .inspect(|t| {
            assert_eq!(t.procedure_facts.len(), 100);
            assert_eq!(t.dim_facility.len(), 1);
            assert_eq!(t.dim_modality.len(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_reused_encounter_code_for_other_patient_fails() {
    let store = MemoryStore::new();
    controller(&store, options())
        .run(vec![record(0)], 500)
        .await
        .unwrap();

    let mut conflicting = record(1);
    conflicting.encounter.encounter_code = "ENC000000".to_string();
    let report = controller(&store, options())
        .run(vec![conflicting], 500)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.rows_loaded, 0);
    assert_eq!(report.rows_failed, 1);
    assert_eq!(report.duplicates_skipped, 0);

    store
        .inspect(|t| {
            assert_eq!(t.patients.len(), 1);
            assert_eq!(t.encounters.len(), 1);
            assert_eq!(t.quality_log.len(), 1);
            assert_eq!(t.quality_log[0].record_key, "PAT000001/ENC000000");
            assert_eq!(t.quality_log[0].error_class, ErrorClass::Integrity);
        })
        .await;
}

#[tokio::test]
async fn test_over_long_patient_code_fails_only_its_record() {
    let store = MemoryStore::new();
    let mut batch = records(3);
    batch[1].patient.patient_code = "P".repeat(60);

    let report = controller(&store, options()).run(batch, 500).await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.rows_loaded, 2);
    assert_eq!(report.rows_failed, 1);
    assert_eq!(report.chunks_failed, 0);

    store
        .inspect(|t| {
            assert_eq!(t.patients.len(), 2);
            assert_eq!(t.quality_log.len(), 1);
            assert_eq!(t.quality_log[0].stage, QualityStage::Precheck);
            assert_eq!(t.quality_log[0].error_class, ErrorClass::Resolution);
        })
        .await;
}
