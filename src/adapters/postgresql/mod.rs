//! PostgreSQL database integration
//!
//! This module provides the production storage backend: master data,
//! operational graph, star schema and audit tables in one database.

pub mod adapter;
pub mod client;
mod errors;
pub mod models;
pub mod transaction;

pub use adapter::PostgreSQLAdapter;
pub use client::PostgreSQLClient;
pub use models::PostgreSQLWatermark;
pub use transaction::PgTransaction;
