//! Tephra - In-Memory Head Block for a Time-Series Database
//!
//! The head block is the hot, writable tier of a time-series database:
//! it ingests batches of (timestamp, value) samples tagged with label
//! sets, indexes them for query, and records them in a write-ahead log
//! so the block can be rebuilt after a crash.
//!
//! # Architecture
//!
//! - **WAL (Write-Ahead Log)**: Durability guarantee through sequential writes
//! - **MemSeries**: Per-series compressed chunk list with a recent-sample tail buffer
//! - **Postings**: Inverted index from label terms to ascending series IDs
//! - **Position mapper**: Bijection between insertion order and label-sorted order

pub mod chunk;
pub mod head;
pub mod labels;
pub mod mapper;
pub mod postings;
pub mod series;
pub mod wal;

mod error;
mod types;

pub use error::{HeadError, Result};
pub use head::{HeadBlock, HeadIndexReader, HeadSeriesReader};
pub use types::*;

/// Tephra version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Samples per chunk before a new one is cut
    pub const SAMPLES_PER_CHUNK: usize = 10050;

    /// Maximum chunks per series (chunk references pack the index into 8 bits)
    pub const MAX_CHUNKS_PER_SERIES: usize = 256;

    /// Maximum series per block (chunk references pack the series ID into 24 bits)
    pub const MAX_SERIES: usize = 1 << 24;

    /// Samples per series at which a block counts as full
    pub const FULLNESS_SAMPLES_PER_SERIES: f64 = 250.0;

    /// WAL segment size (16MB)
    pub const WAL_SEGMENT_SIZE: usize = 16 * 1024 * 1024;

    /// Default WAL flush interval (15s)
    pub const WAL_FLUSH_INTERVAL_MS: u64 = 15_000;
}
