//! WAL reader for recovery

use super::{WalConfig, WalEntry};
use crate::error::{HeadError, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn};

/// Reads back all entries after a restart
pub struct WalReader {
    config: WalConfig,
}

impl WalReader {
    /// Create a new reader
    pub fn new(config: WalConfig) -> Self {
        Self { config }
    }

    /// Recover all entries from the segments in ID order.
    ///
    /// A segment with a corrupt or half-written tail is truncated at
    /// the first bad entry; recovery continues with what was read.
    pub fn recover(&self) -> Result<Vec<WalEntry>> {
        let mut entries = Vec::new();

        for segment_path in self.find_segments()? {
            let segment_entries = self.read_segment(&segment_path)?;
            info!(
                "recovered {} entries from {:?}",
                segment_entries.len(),
                segment_path
            );
            entries.extend(segment_entries);
        }

        Ok(entries)
    }

    fn find_segments(&self) -> Result<Vec<PathBuf>> {
        let mut segments = Vec::new();

        if !self.config.dir.exists() {
            return Ok(segments);
        }

        for entry in fs::read_dir(&self.config.dir)? {
            let path = entry?.path();
            if super::parse_segment_id(&path).is_some() {
                segments.push(path);
            }
        }

        segments.sort_by_key(|p| super::parse_segment_id(p).unwrap_or(0));

        Ok(segments)
    }

    fn read_segment(&self, path: &PathBuf) -> Result<Vec<WalEntry>> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalEntry::decode(&data[offset..]) {
                Ok((entry, consumed)) => {
                    entries.push(entry);
                    offset += consumed;
                }
                Err(HeadError::ChecksumMismatch { .. }) => {
                    warn!("checksum mismatch at offset {} in {:?}, truncating", offset, path);
                    break;
                }
                Err(HeadError::TruncatedWalEntry) => {
                    // Crash mid-write; the tail never made it to disk.
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;
    use crate::wal::{SyncPolicy, WalSample, WalWriter};
    use std::io::Write;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> WalConfig {
        WalConfig {
            dir: dir.path().to_path_buf(),
            sync_policy: SyncPolicy::Immediate,
            segment_size: 256,
        }
    }

    #[test]
    fn test_recovery_order() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        {
            let writer = WalWriter::new(config.clone()).unwrap();
            for i in 0..20i64 {
                let entry = WalEntry::Samples(vec![WalSample {
                    ref_id: i as u32,
                    t: i,
                    v: i as f64,
                }]);
                writer.append_all(&[entry]).unwrap();
            }
        }

        let entries = WalReader::new(config).recover().unwrap();
        assert_eq!(entries.len(), 20);
        for (i, entry) in entries.iter().enumerate() {
            match entry {
                WalEntry::Samples(samples) => assert_eq!(samples[0].t, i as i64),
                other => panic!("unexpected entry: {:?}", other),
            }
        }
    }

    #[test]
    fn test_recovery_mixed_kinds() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        {
            let writer = WalWriter::new(config.clone()).unwrap();
            writer
                .append_all(&[
                    WalEntry::Series(vec![LabelSet::from_pairs(&[("a", "1")])]),
                    WalEntry::Samples(vec![WalSample {
                        ref_id: 0,
                        t: 10,
                        v: 1.0,
                    }]),
                ])
                .unwrap();
        }

        let entries = WalReader::new(config).recover().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], WalEntry::Series(_)));
        assert!(matches!(entries[1], WalEntry::Samples(_)));
    }

    #[test]
    fn test_truncated_tail_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        {
            let writer = WalWriter::new(config.clone()).unwrap();
            writer
                .append_all(&[WalEntry::Samples(vec![WalSample {
                    ref_id: 0,
                    t: 10,
                    v: 1.0,
                }])])
                .unwrap();
        }

        // Simulate a crash mid-write: a length prefix with no body.
        let segment = fs::read_dir(temp_dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut file = fs::OpenOptions::new().append(true).open(&segment).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[2, 0, 1]).unwrap();

        let entries = WalReader::new(config).recover().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_corrupt_entry_truncates_segment() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        {
            let writer = WalWriter::new(config.clone()).unwrap();
            for i in 0..3i64 {
                writer
                    .append_all(&[WalEntry::Samples(vec![WalSample {
                        ref_id: 0,
                        t: i,
                        v: 1.0,
                    }])])
                    .unwrap();
            }
        }

        // Flip a byte in the middle entry of the single segment.
        let segment = fs::read_dir(temp_dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut data = fs::read(&segment).unwrap();
        let entry_len = data.len() / 3;
        data[entry_len + 6] ^= 0xFF;
        fs::write(&segment, &data).unwrap();

        let entries = WalReader::new(config).recover().unwrap();
        assert_eq!(entries.len(), 1);
    }
}
