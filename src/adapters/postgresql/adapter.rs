//! PostgreSQL adapter implementing database traits
//!
//! This module provides the implementation of the WarehouseStore and
//! StateStorage traits for PostgreSQL.

use crate::adapters::database::traits::{StateStorage, WarehouseStore, WarehouseTransaction};
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::errors::map_pg_error;
use crate::adapters::postgresql::models::PostgreSQLWatermark;
use crate::core::state::watermark::Watermark;
use crate::domain::Result;
use async_trait::async_trait;
use std::sync::Arc;

const WATERMARK_COLUMNS: &str = "pipeline_name, last_checkpoint, pending_procedures, \
     total_rows_loaded, total_rows_failed, last_run_id, last_run_started_at, \
     last_run_completed_at, last_run_status";

/// PostgreSQL implementation of database traits
///
/// This wraps the PostgreSQLClient and implements the WarehouseStore and StateStorage traits.
pub struct PostgreSQLAdapter {
    client: Arc<PostgreSQLClient>,
}

impl PostgreSQLAdapter {
    /// Create a new PostgreSQL adapter
    pub fn new(client: PostgreSQLClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Create a new PostgreSQL adapter with an Arc-wrapped client
    pub fn new_with_arc(client: Arc<PostgreSQLClient>) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Arc<PostgreSQLClient> {
        &self.client
    }
}

#[async_trait]
impl WarehouseStore for PostgreSQLAdapter {
    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.client.ensure_schema().await
    }

    async fn begin(&self) -> Result<Box<dyn WarehouseTransaction>> {
        let tx = self.client.begin().await?;
        Ok(Box::new(tx))
    }

    fn backend_name(&self) -> &str {
        "postgresql"
    }
}

#[async_trait]
impl StateStorage for PostgreSQLAdapter {
    async fn load_watermark(&self, pipeline_name: &str) -> Result<Option<Watermark>> {
        tracing::debug!(pipeline = %pipeline_name, "Loading watermark from PostgreSQL");

        let conn = self.client.get_connection().await?;
        let query = format!("SELECT {WATERMARK_COLUMNS} FROM audit.watermarks WHERE pipeline_name = $1");
        let row = conn
            .query_opt(query.as_str(), &[&pipeline_name])
            .await
            .map_err(|e| map_pg_error(&e, "Failed to load watermark"))?;

        match row {
            Some(row) => {
                let watermark = PostgreSQLWatermark::from_row(&row)?.to_domain()?;
                tracing::debug!(
                    pipeline = %pipeline_name,
                    checkpoint = ?watermark.last_checkpoint,
                    "Watermark loaded from PostgreSQL"
                );
                Ok(Some(watermark))
            }
            None => {
                tracing::debug!(pipeline = %pipeline_name, "No watermark found in PostgreSQL (first run)");
                Ok(None)
            }
        }
    }

    async fn save_watermark(&self, watermark: &Watermark, dry_run: bool) -> Result<()> {
        if dry_run {
            tracing::info!(
                pipeline = %watermark.pipeline_name,
                "DRY RUN: Would save watermark to PostgreSQL"
            );
            return Ok(());
        }

        let pg = PostgreSQLWatermark::from_domain(watermark)?;

        let upsert_query = r#"
            INSERT INTO audit.watermarks (
                pipeline_name, last_checkpoint, pending_procedures, total_rows_loaded,
                total_rows_failed, last_run_id, last_run_started_at, last_run_completed_at,
                last_run_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (pipeline_name) DO UPDATE SET
                last_checkpoint = EXCLUDED.last_checkpoint,
                pending_procedures = EXCLUDED.pending_procedures,
                total_rows_loaded = EXCLUDED.total_rows_loaded,
                total_rows_failed = EXCLUDED.total_rows_failed,
                last_run_id = EXCLUDED.last_run_id,
                last_run_started_at = EXCLUDED.last_run_started_at,
                last_run_completed_at = EXCLUDED.last_run_completed_at,
                last_run_status = EXCLUDED.last_run_status
        "#;

        let conn = self.client.get_connection().await?;
        conn.execute(
            upsert_query,
            &[
                &pg.pipeline_name,
                &pg.last_checkpoint,
                &pg.pending_procedures,
                &pg.total_rows_loaded,
                &pg.total_rows_failed,
                &pg.last_run_id,
                &pg.last_run_started_at,
                &pg.last_run_completed_at,
                &pg.last_run_status,
            ],
        )
        .await
        .map_err(|e| map_pg_error(&e, "Failed to save watermark"))?;

        tracing::debug!(
            pipeline = %watermark.pipeline_name,
            "Watermark saved to PostgreSQL successfully"
        );
        Ok(())
    }

    async fn get_all_watermarks(&self) -> Result<Vec<Watermark>> {
        tracing::debug!("Querying all watermarks from PostgreSQL");

        let conn = self.client.get_connection().await?;
        let query = format!("SELECT {WATERMARK_COLUMNS} FROM audit.watermarks ORDER BY pipeline_name");
        let rows = conn
            .query(query.as_str(), &[])
            .await
            .map_err(|e| map_pg_error(&e, "Failed to list watermarks"))?;

        let watermarks = rows
            .iter()
            .map(|row| PostgreSQLWatermark::from_row(row).and_then(|pg| pg.to_domain()))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(count = watermarks.len(), "Loaded watermarks from PostgreSQL");
        Ok(watermarks)
    }
}
