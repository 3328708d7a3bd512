//! The head block: ingest, index, and read paths
//!
//! Series are created under the block's write lock and assigned dense
//! references in insertion order. Samples are logged to the WAL before
//! any in-memory chunk is touched, so acknowledged data survives a
//! crash. Readers work against snapshots and never block ingest on
//! other series.

use crate::config;
use crate::error::{HeadError, Result};
use crate::labels::LabelSet;
use crate::mapper::PositionMapper;
use crate::postings::{ListPostings, MemPostings, Term};
use crate::series::{MemSeries, SafeChunk};
use crate::types::{BlockStats, ChunkMeta, HashedSample, SeriesRef, Timestamp};
use crate::wal::{Wal, WalEntry, WalSample};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Handles reads and writes of time series data within a time window
pub struct HeadBlock {
    dir: PathBuf,
    inner: RwLock<HeadInner>,
    stats: RwLock<BlockStats>,
    mapper: Mutex<PositionMapper>,
    wal: Wal,
    // Set after a capacity violation; the block refuses further appends.
    sealed: AtomicBool,
}

#[derive(Default)]
struct HeadInner {
    /// All series, indexed by reference
    series: Vec<Arc<MemSeries>>,
    /// Collision map from label-set hash to series
    hashes: HashMap<u64, Vec<Arc<MemSeries>>>,
    /// Label names to observed values
    values: HashMap<String, HashSet<String>>,
    /// Postings lists for terms
    postings: MemPostings,
}

impl HeadInner {
    fn get(&self, hash: u64, lset: &LabelSet) -> Option<&Arc<MemSeries>> {
        self.hashes.get(&hash)?.iter().find(|s| s.lset() == lset)
    }

    fn create(&mut self, hash: u64, lset: LabelSet) -> Result<Arc<MemSeries>> {
        if self.series.len() >= config::MAX_SERIES {
            return Err(HeadError::OutOfBounds);
        }

        let ref_id = self.series.len() as SeriesRef;
        let series = Arc::new(MemSeries::new(ref_id, lset.clone()));

        self.series.push(series.clone());
        self.hashes.entry(hash).or_default().push(series.clone());

        for label in lset.iter() {
            self.values
                .entry(label.name.clone())
                .or_default()
                .insert(label.value.clone());
            self.postings
                .add(ref_id, Term::new(label.name.as_str(), label.value.as_str()));
        }
        self.postings.add(ref_id, Term::all());

        Ok(series)
    }
}

impl HeadBlock {
    /// Open a head block in `dir`, replaying its WAL
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let wal = Wal::open(
            dir.join("wal"),
            Duration::from_millis(config::WAL_FLUSH_INTERVAL_MS),
        )?;

        let mut inner = HeadInner::default();
        let mut stats = BlockStats::new();

        for entry in wal.read_all()? {
            match entry {
                WalEntry::Series(lsets) => {
                    for lset in lsets {
                        let hash = lset.hash_value();
                        inner.create(hash, lset)?;
                        stats.series_count += 1;
                        // The head block has one chunk per series.
                        stats.chunk_count += 1;
                    }
                }
                WalEntry::Samples(samples) => {
                    for s in samples {
                        let series =
                            inner.series.get(s.ref_id as usize).ok_or_else(|| {
                                HeadError::WalRecovery(format!(
                                    "sample references undeclared series {}",
                                    s.ref_id
                                ))
                            })?;
                        // The same append path as ingest, so a sample the
                        // live path skipped is skipped again here.
                        if series.append(s.t, s.v)? {
                            stats.sample_count += 1;
                            stats.min_time = stats.min_time.min(s.t);
                            stats.max_time = stats.max_time.max(s.t);
                        }
                    }
                }
            }
        }

        info!(
            "opened head block at {:?}: {} series, {} samples",
            dir, stats.series_count, stats.sample_count
        );

        let head = Self {
            dir,
            inner: RwLock::new(inner),
            stats: RwLock::new(stats),
            mapper: Mutex::new(PositionMapper::new()),
            wal,
            sealed: AtomicBool::new(false),
        };
        head.update_mapping();

        Ok(head)
    }

    /// The block's directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the block has been persisted; the head block never is
    pub fn persisted(&self) -> bool {
        false
    }

    /// Statistics about the indexed data
    pub fn stats(&self) -> BlockStats {
        *self.stats.read()
    }

    /// Sync all data and release underlying resources
    pub fn close(&self) -> Result<()> {
        self.wal.close()
    }

    /// Read-side view over the index
    pub fn index(&self) -> HeadIndexReader<'_> {
        HeadIndexReader { head: self }
    }

    /// Read-side view over chunk data
    pub fn series_data(&self) -> HeadSeriesReader<'_> {
        HeadSeriesReader { head: self }
    }

    /// Ratio of samples per series against the target chunk fill,
    /// used by the owning database as a flush trigger
    pub fn fullness(&self) -> f64 {
        let stats = self.stats.read();
        stats.sample_count as f64
            / (stats.series_count + 1) as f64
            / config::FULLNESS_SAMPLES_PER_SERIES
    }

    /// Ingest a batch of samples.
    ///
    /// The whole batch is rejected on an out-of-order or amending
    /// sample, or when the WAL write fails; in those cases readers
    /// observe no effect. Samples duplicating their series' newest
    /// timestamp with an equal value are appended; with a conflicting
    /// value they are skipped without failing the batch. Returns the
    /// number of samples applied.
    pub fn append_batch(&self, samples: &mut [HashedSample]) -> Result<usize> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(HeadError::OutOfBounds);
        }

        // Find series for all samples and allocate tentative references
        // for the ones seen for the first time.
        let mut new_series: Vec<LabelSet> = Vec::new();
        let mut new_hashes: Vec<u64> = Vec::new();
        let mut new_sample_idx: Vec<usize> = Vec::new();
        let mut unique_hashes: HashMap<u64, SeriesRef> = HashMap::new();

        let read_inner = self.inner.read();

        for (i, s) in samples.iter_mut().enumerate() {
            if let Some(series) = read_inner.get(s.hash, &s.labels) {
                let state = series.state().read();
                if let Some(head) = state.chunks.last() {
                    if s.t < head.max_time {
                        return Err(HeadError::OutOfOrderSample);
                    }
                    if s.t == head.max_time && s.v != state.last_value {
                        return Err(HeadError::AmendSample);
                    }
                }
                s.ref_id = series.ref_id();
                continue;
            }

            // A batch may carry several samples for one new series;
            // they share the first tentative reference.
            if let Some(&r) = unique_hashes.get(&s.hash) {
                s.ref_id = r;
                new_sample_idx.push(i);
                continue;
            }
            let r = new_series.len() as SeriesRef;
            unique_hashes.insert(s.hash, r);
            s.ref_id = r;
            new_series.push(s.labels.clone());
            new_hashes.push(s.hash);
            new_sample_idx.push(i);
        }

        let mut created: Vec<LabelSet> = Vec::new();
        let inner = if new_series.is_empty() {
            read_inner
        } else {
            drop(read_inner);
            let mut write_inner = self.inner.write();

            // Another batch may have created some of these series while
            // the lock was switched; resolve each one against the hash
            // map again before creating it.
            let mut resolved: Vec<SeriesRef> = Vec::with_capacity(new_series.len());
            for (lset, &hash) in new_series.iter().zip(new_hashes.iter()) {
                let existing = write_inner.get(hash, lset).map(|s| s.ref_id());
                match existing {
                    Some(r) => resolved.push(r),
                    None => {
                        let series = match write_inner.create(hash, lset.clone()) {
                            Ok(series) => series,
                            Err(e) => {
                                self.sealed.store(true, Ordering::Release);
                                return Err(e);
                            }
                        };
                        created.push(lset.clone());
                        resolved.push(series.ref_id());
                    }
                }
            }
            for &i in &new_sample_idx {
                let tentative = samples[i].ref_id as usize;
                samples[i].ref_id = resolved[tentative];
            }

            RwLockWriteGuard::downgrade(write_inner)
        };

        // After the batch reaches the WAL there may be no further
        // failures short of a capacity violation.
        let wal_samples: Vec<WalSample> = samples
            .iter()
            .map(|s| WalSample {
                ref_id: s.ref_id,
                t: s.t,
                v: s.v,
            })
            .collect();
        self.wal.log(&created, &wal_samples)?;

        let mut total = samples.len();
        let mut min_time = Timestamp::MAX;
        let mut max_time = Timestamp::MIN;

        for s in samples.iter() {
            let series = inner
                .series
                .get(s.ref_id as usize)
                .ok_or(HeadError::SeriesNotFound(s.ref_id))?;
            match series.append(s.t, s.v) {
                Ok(true) => {
                    min_time = min_time.min(s.t);
                    max_time = max_time.max(s.t);
                }
                Ok(false) => total -= 1,
                Err(e) => {
                    self.sealed.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }

        let mut stats = self.stats.write();
        stats.sample_count += total as u64;
        stats.series_count += created.len() as u64;
        stats.chunk_count += created.len() as u64;
        if min_time < stats.min_time {
            stats.min_time = min_time;
        }
        if max_time > stats.max_time {
            stats.max_time = max_time;
        }

        Ok(total)
    }

    /// Refresh the insertion-to-sorted position mapping if the series
    /// list has grown
    pub fn update_mapping(&self) {
        let mut mapper = self.mapper.lock();
        self.update_mapping_locked(&mut mapper);
    }

    fn update_mapping_locked(&self, mapper: &mut PositionMapper) {
        let inner = self.inner.read();
        if !mapper.is_stale(inner.series.len()) {
            return;
        }

        // Sorting is expensive; copy the series list out so ingest is
        // not blocked behind it.
        let series = inner.series.clone();
        drop(inner);

        mapper.update(&series);
    }

    /// Reorder postings from reference order to the order of the series
    /// they reference.
    ///
    /// The result is no longer monotonic and must not be used for
    /// regular postings set operations.
    pub fn remap_postings<P>(&self, postings: P) -> ListPostings
    where
        P: Iterator<Item = SeriesRef>,
    {
        let mut list: Vec<SeriesRef> = postings.collect();

        let mut mapper = self.mapper.lock();
        self.update_mapping_locked(&mut mapper);
        mapper.sort_refs(&mut list);

        ListPostings::new(list)
    }
}

/// Read-side view over the head block's index
pub struct HeadIndexReader<'a> {
    head: &'a HeadBlock,
}

impl HeadIndexReader<'_> {
    /// Sorted values observed for a label name; exactly one name must
    /// be supplied
    pub fn label_values(&self, names: &[&str]) -> Result<Vec<String>> {
        if names.len() != 1 {
            return Err(HeadError::InvalidLabelQuery(names.len()));
        }

        let inner = self.head.inner.read();
        let mut values: Vec<String> = inner
            .values
            .get(names[0])
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        values.sort();

        Ok(values)
    }

    /// The label tuples currently indexed; single names in this release
    pub fn label_indices(&self) -> Vec<Vec<String>> {
        let inner = self.head.inner.read();
        inner.values.keys().map(|name| vec![name.clone()]).collect()
    }

    /// Postings for a label pair
    pub fn postings(&self, name: &str, value: &str) -> ListPostings {
        let inner = self.head.inner.read();
        inner.postings.get(&Term::new(name, value))
    }

    /// The label set and chunk metadata for a series reference
    pub fn series(&self, ref_id: SeriesRef) -> Result<(LabelSet, Vec<ChunkMeta>)> {
        let inner = self.head.inner.read();
        let series = inner
            .series
            .get(ref_id as usize)
            .ok_or(HeadError::SeriesNotFound(ref_id))?;

        let state = series.state().read();
        let metas = state
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| ChunkMeta {
                min_time: c.min_time,
                max_time: c.max_time,
                ref_id: (ref_id << 8) | i as u32,
            })
            .collect();

        Ok((series.lset().clone(), metas))
    }

    /// Statistics about the indexed data
    pub fn stats(&self) -> BlockStats {
        self.head.stats()
    }
}

/// Read-side view over the head block's chunk data
pub struct HeadSeriesReader<'a> {
    head: &'a HeadBlock,
}

impl HeadSeriesReader<'_> {
    /// The chunk for a packed reference.
    ///
    /// The returned handle is a snapshot; its iterator serves the
    /// newest samples from the series' tail buffer.
    pub fn chunk(&self, ref_id: u32) -> Result<SafeChunk> {
        let series_id = ref_id >> 8;
        let chunk_idx = (ref_id & 0xff) as usize;

        let inner = self.head.inner.read();
        let series = inner
            .series
            .get(series_id as usize)
            .ok_or(HeadError::SeriesNotFound(series_id))?;
        series.chunk(chunk_idx)
    }
}
