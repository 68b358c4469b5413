//! State manager for watermark persistence

use crate::adapters::database::traits::StateStorage;
use crate::core::state::watermark::Watermark;
use crate::domain::Result;
use std::sync::Arc;

/// State manager for watermark persistence
///
/// Loads and saves the per-pipeline watermark through a state storage backend.
pub struct StateManager {
    /// State storage backend
    storage: Arc<dyn StateStorage + Send + Sync>,
}

impl StateManager {
    /// Create a new StateManager with a state storage backend
    pub fn new_with_storage(storage: Arc<dyn StateStorage + Send + Sync>) -> Self {
        Self { storage }
    }

    /// Load a watermark from the backend
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails for reasons other than "not found".
    pub async fn load_watermark(&self, pipeline_name: &str) -> Result<Option<Watermark>> {
        self.storage.load_watermark(pipeline_name).await
    }

    /// Load the pipeline's watermark, or a fresh one if none was saved yet
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub async fn load_or_create(&self, pipeline_name: &str) -> Result<Watermark> {
        match self.load_watermark(pipeline_name).await? {
            Some(watermark) => Ok(watermark),
            None => {
                tracing::info!(pipeline = pipeline_name, "No watermark found, starting fresh");
                Ok(Watermark::new(pipeline_name))
            }
        }
    }

    /// Save a watermark (upsert)
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert operation fails.
    pub async fn save_watermark(&self, watermark: &Watermark, dry_run: bool) -> Result<()> {
        self.storage.save_watermark(watermark, dry_run).await
    }

    /// Get all watermarks
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_all_watermarks(&self) -> Result<Vec<Watermark>> {
        self.storage.get_all_watermarks().await
    }

    /// Save the watermark with explicit checkpoint semantics
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails.
    pub async fn checkpoint(&self, watermark: &Watermark, dry_run: bool) -> Result<()> {
        self.storage.checkpoint(watermark, dry_run).await
    }
}
