//! Database abstraction layer
//!
//! This module provides a trait-based abstraction for warehouse storage,
//! allowing the engine to run against PostgreSQL or the in-memory store.

pub mod factory;
pub mod traits;

pub use factory::create_store_and_state;
pub use traits::{
    IntegrityCheck, RegistryInsert, StateStorage, WarehouseStore, WarehouseTransaction,
};
