//! Integration tests for dry runs, graceful shutdown and systemic failures

mod common;

use common::{controller, options, records, state};
use imaging_warehouse::adapters::memory::MemoryStore;
use imaging_warehouse::core::batch::{parse_records, EngineOptions};
use imaging_warehouse::domain::RunStatus;
use std::io::Cursor;
use tokio::sync::watch;

#[tokio::test]
async fn test_dry_run_commits_nothing() {
    let store = MemoryStore::new();
    let dry = EngineOptions {
        dry_run: true,
        ..options()
    };

    let report = controller(&store, dry).run(records(20), 5).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.rows_loaded, 20);
    assert_eq!(report.status, RunStatus::Success);

    store
        .inspect(|t| {
            assert!(t.references.is_empty());
            assert!(t.patients.is_empty());
            assert!(t.procedure_facts.is_empty());
            assert!(t.run_log.is_empty());
            assert!(t.change_log.is_empty());
        })
        .await;

    let watermark = state(&store)
        .load_watermark("imaging_warehouse_load")
        .await
        .unwrap();
    assert!(watermark.is_none());
}

#[tokio::test]
async fn test_dry_run_failure_writes_no_quality_log() {
    let store = MemoryStore::new();
    let mut batch = records(10);
    batch[3].encounter.procedures[0].diagnoses[0].confidence = -0.1;
    let dry = EngineOptions {
        dry_run: true,
        ..options()
    };

    let report = controller(&store, dry).run(batch, 5).await.unwrap();

    assert_eq!(report.rows_loaded, 5);
    assert_eq!(report.rows_failed, 5);
    store.inspect(|t| assert!(t.quality_log.is_empty())).await;
}

#[tokio::test]
async fn test_shutdown_before_run_cancels_every_chunk() {
    let store = MemoryStore::new();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = controller(&store, options())
        .with_shutdown(rx)
        .run(records(12), 4)
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.rows_cancelled, 12);
    assert_eq!(report.rows_loaded, 0);
    assert_eq!(report.status, RunStatus::Partial);
    store.inspect(|t| assert!(t.encounters.is_empty())).await;

    // Committed state is consistent, so a later run picks up everything
    let report = controller(&store, options())
        .run(records(12), 4)
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.rows_loaded, 12);
    assert_eq!(report.duplicates_skipped, 0);
}

#[tokio::test]
async fn test_unavailable_store_fails_run_without_advancing() {
    let store = MemoryStore::new();
    controller(&store, options())
        .run(records(3), 10)
        .await
        .unwrap();
    let before = state(&store)
        .load_watermark("imaging_warehouse_load")
        .await
        .unwrap()
        .unwrap();

    store.set_unavailable(true);
    let report = controller(&store, options())
        .run(records(6), 2)
        .await
        .unwrap();
    store.set_unavailable(false);

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.rows_loaded, 0);
    assert!(report.error_message.is_some());

    let after = state(&store)
        .load_watermark("imaging_warehouse_load")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.last_checkpoint, before.last_checkpoint);
    assert_eq!(after.total_rows_loaded, before.total_rows_loaded);
}

#[tokio::test]
async fn test_input_round_trip_into_run() {
    let lines: Vec<String> = records(3)
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    let text = format!("{}\n\n", lines.join("\n"));

    let parsed = parse_records(Cursor::new(text)).unwrap();
    assert_eq!(parsed.len(), 3);

    let store = MemoryStore::new();
    let report = controller(&store, options()).run(parsed, 2).await.unwrap();
    assert_eq!(report.rows_loaded, 3);
    assert_eq!(report.chunks_total, 2);
}
