//! Storage backend factory
//!
//! This module provides factory functions to create storage backends based on configuration.

use crate::adapters::database::traits::{StateStorage, WarehouseStore};
use crate::adapters::memory::MemoryStore;
use crate::adapters::postgresql::adapter::PostgreSQLAdapter;
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::config::schema::{DatabaseTarget, WarehouseConfig};
use crate::domain::{Result, WarehouseError};
use std::sync::Arc;

/// Create both the warehouse store and state storage from the same underlying client
///
/// Both handles share one connection pool (or one in-memory store).
///
/// # Errors
///
/// Returns a `Configuration` error if the selected backend has no configuration
/// section, or an error from the client constructor.
pub async fn create_store_and_state(
    config: &WarehouseConfig,
) -> Result<(
    Arc<dyn WarehouseStore>,
    Arc<dyn StateStorage + Send + Sync>,
)> {
    match config.database_target {
        DatabaseTarget::PostgreSQL => {
            let pg_config = config.postgresql.as_ref().ok_or_else(|| {
                WarehouseError::Configuration(
                    "database_target is postgresql but [postgresql] is missing".to_string(),
                )
            })?;

            tracing::info!("Creating PostgreSQL store and state storage");
            let client = Arc::new(PostgreSQLClient::new(pg_config.clone()).await?);
            let adapter = Arc::new(PostgreSQLAdapter::new_with_arc(client));

            Ok((
                adapter.clone() as Arc<dyn WarehouseStore>,
                adapter as Arc<dyn StateStorage + Send + Sync>,
            ))
        }
        DatabaseTarget::Memory => {
            tracing::info!("Creating in-memory store and state storage");
            let store = MemoryStore::new();

            Ok((
                Arc::new(store.clone()) as Arc<dyn WarehouseStore>,
                Arc::new(store) as Arc<dyn StateStorage + Send + Sync>,
            ))
        }
    }
}
