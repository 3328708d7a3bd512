//! WAL writer

use super::{SyncPolicy, WalConfig, WalEntry};
use crate::error::Result;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Appends entries to segment files on disk
pub struct WalWriter {
    config: WalConfig,
    inner: Mutex<WalWriterInner>,
}

struct WalWriterInner {
    file: BufWriter<File>,
    segment_id: u64,
    bytes_written: usize,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl WalWriter {
    /// Create a writer, continuing the latest existing segment
    pub fn new(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let segment_id = Self::find_latest_segment(&config.dir)?;
        let file = Self::open_segment(&config.dir, segment_id)?;
        let bytes_written = file.metadata()?.len() as usize;

        let inner = WalWriterInner {
            file: BufWriter::new(file),
            segment_id,
            bytes_written,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Append a group of entries as one write.
    ///
    /// All entries land in the same segment, so a recovering reader
    /// sees either the whole group or a truncated tail it can discard.
    pub fn append_all(&self, entries: &[WalEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut frames = Vec::with_capacity(entries.len());
        let mut total = 0;
        for entry in entries {
            let frame = entry.encode()?;
            total += frame.len();
            frames.push(frame);
        }

        let mut inner = self.inner.lock();

        if inner.bytes_written > 0 && inner.bytes_written + total > self.config.segment_size {
            self.rotate_segment(&mut inner)?;
        }

        for frame in &frames {
            inner.file.write_all(frame)?;
        }
        inner.bytes_written += total;
        inner.writes_since_sync += 1;

        if self.should_sync(&inner) {
            Self::sync_inner(&mut inner)?;
        }

        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::sync_inner(&mut inner)
    }

    fn sync_inner(inner: &mut WalWriterInner) -> Result<()> {
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;
        inner.writes_since_sync = 0;
        inner.last_sync = Instant::now();
        Ok(())
    }

    fn should_sync(&self, inner: &WalWriterInner) -> bool {
        match self.config.sync_policy {
            SyncPolicy::Immediate => true,
            SyncPolicy::EveryN(n) => inner.writes_since_sync >= n,
            SyncPolicy::Interval { millis } => {
                inner.last_sync.elapsed().as_millis() >= millis as u128
            }
            SyncPolicy::None => false,
        }
    }

    fn rotate_segment(&self, inner: &mut WalWriterInner) -> Result<()> {
        Self::sync_inner(inner)?;

        inner.segment_id += 1;
        let file = Self::open_segment(&self.config.dir, inner.segment_id)?;
        inner.file = BufWriter::new(file);
        inner.bytes_written = 0;

        Ok(())
    }

    fn find_latest_segment(dir: &Path) -> Result<u64> {
        let mut max_id = 0u64;
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if let Some(id) = super::parse_segment_id(&path) {
                    max_id = max_id.max(id);
                }
            }
        }
        Ok(max_id)
    }

    fn open_segment(dir: &Path, segment_id: u64) -> Result<File> {
        let path = dir.join(format!("wal_{:020}.log", segment_id));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalSample;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_sync() {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig {
            dir: temp_dir.path().to_path_buf(),
            sync_policy: SyncPolicy::Immediate,
            segment_size: 1024,
        };

        let writer = WalWriter::new(config).unwrap();
        let entry = WalEntry::Samples(vec![WalSample {
            ref_id: 0,
            t: 1000,
            v: 23.5,
        }]);
        writer.append_all(&[entry]).unwrap();
        writer.sync().unwrap();

        let files: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(crate::wal::parse_segment_id(&files[0]), Some(0));
    }

    #[test]
    fn test_segment_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig {
            dir: temp_dir.path().to_path_buf(),
            sync_policy: SyncPolicy::Immediate,
            segment_size: 64,
        };

        let writer = WalWriter::new(config).unwrap();
        for i in 0..10 {
            let entry = WalEntry::Samples(vec![WalSample {
                ref_id: 0,
                t: i,
                v: i as f64,
            }]);
            writer.append_all(&[entry]).unwrap();
        }

        let count = fs::read_dir(temp_dir.path()).unwrap().count();
        assert!(count > 1, "expected rotated segments, got {}", count);
    }
}
