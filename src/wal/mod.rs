//! Write-ahead log for the head block
//!
//! Every ingested batch is logged before it mutates in-memory state, so
//! the block can be rebuilt after a crash by replaying the log. Two
//! entry kinds exist: series declarations and sample batches.

mod entry;
mod reader;
mod writer;

pub use entry::{WalEntry, WalSample};
pub use reader::WalReader;
pub use writer::WalWriter;

use crate::config;
use crate::error::Result;
use crate::labels::LabelSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// WAL sync policy
#[derive(Debug, Clone, Copy)]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    Immediate,
    /// Sync after N writes
    EveryN(usize),
    /// Sync on interval (trades durability for performance)
    Interval { millis: u64 },
    /// Never sync (OS decides, fastest, least safe)
    None,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Interval {
            millis: config::WAL_FLUSH_INTERVAL_MS,
        }
    }
}

/// WAL configuration
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory for segment files
    pub dir: PathBuf,
    /// Sync policy
    pub sync_policy: SyncPolicy,
    /// Maximum segment size in bytes
    pub segment_size: usize,
}

/// The head block's append log
pub struct Wal {
    writer: WalWriter,
    config: WalConfig,
}

impl Wal {
    /// Open or create the log under `dir` with the given flush interval
    pub fn open(dir: impl Into<PathBuf>, flush_interval: Duration) -> Result<Self> {
        Self::with_config(WalConfig {
            dir: dir.into(),
            sync_policy: SyncPolicy::Interval {
                millis: flush_interval.as_millis() as u64,
            },
            segment_size: config::WAL_SEGMENT_SIZE,
        })
    }

    /// Open or create the log with explicit configuration
    pub fn with_config(config: WalConfig) -> Result<Self> {
        Ok(Self {
            writer: WalWriter::new(config.clone())?,
            config,
        })
    }

    /// Atomically record a set of new series declarations followed by a
    /// sample batch referencing them or prior declarations
    pub fn log(&self, series: &[LabelSet], samples: &[WalSample]) -> Result<()> {
        let mut entries = Vec::with_capacity(2);
        if !series.is_empty() {
            entries.push(WalEntry::Series(series.to_vec()));
        }
        if !samples.is_empty() {
            entries.push(WalEntry::Samples(samples.to_vec()));
        }
        self.writer.append_all(&entries)
    }

    /// Read back every entry in original order
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        WalReader::new(self.config.clone()).recover()
    }

    /// Force buffered entries to disk
    pub fn sync(&self) -> Result<()> {
        self.writer.sync()
    }

    /// Flush and release the log
    pub fn close(&self) -> Result<()> {
        self.sync()
    }
}

fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_prefix("wal_"))
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}
