//! Core types for the head block

use crate::labels::LabelSet;
use serde::{Deserialize, Serialize};

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Series reference, assigned densely in insertion order
pub type SeriesRef = u32;

/// A single sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp
    pub t: Timestamp,
    /// Value
    pub v: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(t: Timestamp, v: f64) -> Self {
        Self { t, v }
    }
}

/// An ingest sample annotated with its label set and label-set hash.
///
/// `ref_id` is filled in during ingest once the sample has been resolved
/// to a series.
#[derive(Debug, Clone)]
pub struct HashedSample {
    /// 64-bit hash of the label set
    pub hash: u64,
    /// The sample's label set
    pub labels: LabelSet,
    /// Resolved series reference, set during ingest
    pub ref_id: SeriesRef,
    /// Timestamp
    pub t: Timestamp,
    /// Value
    pub v: f64,
}

impl HashedSample {
    /// Create an ingest sample, hashing the label set
    pub fn new(labels: LabelSet, t: Timestamp, v: f64) -> Self {
        let hash = labels.hash_value();
        Self {
            hash,
            labels,
            ref_id: 0,
            t,
            v,
        }
    }
}

/// Time range and reference of a single chunk.
///
/// `ref_id` packs `(series_id << 8) | chunk_index`, capping a block at
/// 2^24 series and a series at 256 chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Minimum timestamp in the chunk
    pub min_time: Timestamp,
    /// Maximum timestamp in the chunk
    pub max_time: Timestamp,
    /// Packed chunk reference
    pub ref_id: u32,
}

/// Statistics about the data indexed in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    /// Minimum sample timestamp observed
    pub min_time: Timestamp,
    /// Maximum sample timestamp observed
    pub max_time: Timestamp,
    /// Number of series
    pub series_count: u64,
    /// Number of chunks
    pub chunk_count: u64,
    /// Number of accepted samples
    pub sample_count: u64,
}

impl BlockStats {
    /// Create empty stats with extreme time sentinels, narrowed as samples arrive
    pub fn new() -> Self {
        Self {
            min_time: Timestamp::MAX,
            max_time: Timestamp::MIN,
            series_count: 0,
            chunk_count: 0,
            sample_count: 0,
        }
    }
}

impl Default for BlockStats {
    fn default() -> Self {
        Self::new()
    }
}
