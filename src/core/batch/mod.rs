//! Batch/audit controller
//!
//! Chunks the input, runs every chunk as one unit of work, and reports the
//! run through a [`RunReport`].

pub mod chunk;
pub mod controller;
pub mod input;
pub mod report;

pub use chunk::{partition, Chunk};
pub use controller::{BatchController, EngineOptions};
pub use input::{parse_records, read_records};
pub use report::{classify_status, ChunkOutcome, ChunkResult, RunReport};
