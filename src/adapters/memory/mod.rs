//! In-process warehouse backend
//!
//! Mirrors the PostgreSQL constraints so the engine can be exercised without
//! a database server.

pub mod store;

pub use store::{MemoryStore, MemoryTransaction, WarehouseTables};
