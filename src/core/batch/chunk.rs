//! Chunking of an input batch
//!
//! A chunk is the unit of work of a run: its records are written, transformed
//! and committed together, or rolled back together.

use crate::domain::{EncounterRecord, Result, WarehouseError};

/// A bounded slice of the input batch
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based chunk number
    pub index: usize,
    /// Position of the first record in the whole batch
    pub offset: usize,
    pub records: Vec<EncounterRecord>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records paired with their position in the whole batch
    pub fn positioned(&self) -> impl Iterator<Item = (usize, &EncounterRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(move |(i, record)| (self.offset + i, record))
    }
}

/// Split `records` into chunks of at most `batch_size` records, keeping input order
///
/// # Errors
///
/// Returns a `Configuration` error when `batch_size` is zero.
///
/// # Example
///
/// ```
/// use imaging_warehouse::core::batch::chunk::partition;
///
/// let chunks = partition(Vec::new(), 500).unwrap();
/// assert!(chunks.is_empty());
/// assert!(partition(Vec::new(), 0).is_err());
/// ```
pub fn partition(records: Vec<EncounterRecord>, batch_size: usize) -> Result<Vec<Chunk>> {
    if batch_size == 0 {
        return Err(WarehouseError::Configuration(
            "batch_size must be at least 1".to_string(),
        ));
    }

    let mut chunks = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(records.len()));
    let mut offset = 0;

    for record in records {
        current.push(record);
        if current.len() == batch_size {
            let records = std::mem::take(&mut current);
            let len = records.len();
            chunks.push(Chunk {
                index: chunks.len(),
                offset,
                records,
            });
            offset += len;
        }
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            offset,
            records: current,
        });
    }

    Ok(chunks)
}
