//! Core transform-and-load logic.
//!
//! # Modules
//!
//! - [`master`] - get-or-create of reference entities and their catalogs
//! - [`registry`] - natural key to internal id mapping
//! - [`operational`] - the operational writer and its mutation hooks
//! - [`analytics`] - dimension and fact population
//! - [`batch`] - chunking, units of work, run report
//! - [`state`] - checkpoint persistence
//! - [`validation`] - post-run integrity scans
//!
//! # Load Workflow
//!
//! 1. **Load State**: read the pipeline watermark
//! 2. **Catch up**: rebuild facts changed since the checkpoint, plus deferred ones
//! 3. **Chunks**: master data, operational writes and analytics per unit of work
//! 4. **Validate**: referential-integrity and value-range scans
//! 5. **Audit**: run summary row and watermark checkpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use imaging_warehouse::adapters::memory::MemoryStore;
//! use imaging_warehouse::core::batch::{read_records, BatchController, EngineOptions};
//! use imaging_warehouse::core::state::StateManager;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let state = Arc::new(StateManager::new_with_storage(Arc::new(store.clone())));
//! let controller = BatchController::new(Arc::new(store), state, EngineOptions::default());
//!
//! let records = read_records("records.jsonl")?;
//! let report = controller.run(records, 500).await?;
//! println!("Loaded: {}, failed: {}", report.rows_loaded, report.rows_failed);
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod batch;
pub mod master;
pub mod operational;
pub mod registry;
pub mod state;
pub mod validation;
