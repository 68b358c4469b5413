//! Storage integrations for the imaging warehouse.
//!
//! - [`database`] - Storage abstraction layer (trait-based)
//! - [`postgresql`] - PostgreSQL implementation
//! - [`memory`] - In-process implementation for tests and dry runs
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern** to isolate external dependencies and
//! enable testing without a database. The engine only sees
//! [`database::WarehouseStore`] and [`database::StateStorage`].
//!
//! ```rust
//! use imaging_warehouse::adapters::database::WarehouseStore;
//! use imaging_warehouse::adapters::memory::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! store.ensure_schema().await?;
//! let tx = store.begin().await?;
//! tx.rollback().await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod memory;
pub mod postgresql;
