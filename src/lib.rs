// Imaging Warehouse - Radiology Data Warehouse Loader
// Copyright (c) 2025 Imaging Warehouse Contributors
// Licensed under the MIT License

//! # Imaging Warehouse
//!
//! Loads batches of radiology encounter records (patient, facility, encounter,
//! procedures with images, reports and findings) into a relational warehouse
//! with four schemas:
//!
//! - **master**: reference entities (modalities, projections, diagnoses,
//!   languages, ...) resolved or created on demand
//! - **operational**: normalized patients, encounters, procedures and
//!   artifacts, keyed by internal ids and guarded by a natural-key registry
//! - **analytics**: a star schema of dimensions and procedure facts
//! - **audit**: row change log, data-quality log and run log
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Resolution, operational writes, analytics transform,
//!   batch control, load state and validation
//! - [`adapters`] - Storage backends (PostgreSQL, in-memory)
//! - [`domain`] - Records, rows, identifiers and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
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
//! println!("{}", report.format_summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Units of work
//!
//! Each chunk of the batch is written, transformed into the star schema and
//! committed in one transaction. A failing chunk is rolled back as a whole and
//! every one of its records is reported in the data-quality log; other chunks
//! are unaffected. Systemic errors (lost connection, exhausted pool) stop the
//! run and leave the checkpoint where it was.
//!
//! ## Error Handling
//!
//! The library uses [`domain::WarehouseError`]; [`domain::WarehouseError::class`]
//! gives the class recorded in the data-quality log.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
