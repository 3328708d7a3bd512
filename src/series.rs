//! Per-series state: compressed chunk list and recent-sample buffer

use crate::chunk::{XorChunk, XorIter};
use crate::config;
use crate::error::{HeadError, Result};
use crate::labels::LabelSet;
use crate::types::{Sample, SeriesRef, Timestamp};
use parking_lot::RwLock;

/// A chunk with its time range and sample count
#[derive(Debug, Clone)]
pub struct MemChunk {
    /// Compressed sample data
    pub chunk: XorChunk,
    /// Minimum timestamp, set when the chunk is cut
    pub min_time: Timestamp,
    /// Maximum timestamp, tracks the newest appended sample
    pub max_time: Timestamp,
    /// Number of samples
    pub samples: usize,
}

impl MemChunk {
    fn new(min_time: Timestamp) -> Self {
        Self {
            chunk: XorChunk::new(),
            min_time,
            max_time: Timestamp::MIN,
            samples: 0,
        }
    }
}

/// Mutable per-series state, guarded by the series lock
#[derive(Debug)]
pub(crate) struct SeriesState {
    /// Chunks in time order; empty until the first accepted sample
    pub chunks: Vec<MemChunk>,
    /// Value of the most recent sample
    pub last_value: f64,
    /// Ring of the last four samples in arrival order, newest at index 3
    pub sample_buf: [Sample; 4],
}

impl SeriesState {
    fn append(&mut self, t: Timestamp, v: f64) -> Result<bool> {
        let needs_cut = self
            .chunks
            .last()
            .map_or(true, |c| c.samples >= config::SAMPLES_PER_CHUNK);

        if needs_cut {
            if self.chunks.len() >= config::MAX_CHUNKS_PER_SERIES {
                return Err(HeadError::OutOfBounds);
            }
            self.chunks.push(MemChunk::new(t));
        } else if let Some(head) = self.chunks.last() {
            // Skip duplicate timestamps with a conflicting value.
            if head.max_time == t && self.last_value != v {
                return Ok(false);
            }
        }

        if let Some(head) = self.chunks.last_mut() {
            head.chunk.append(t, v);
            head.max_time = t;
            head.samples += 1;
        }

        self.last_value = v;
        self.sample_buf.rotate_left(1);
        self.sample_buf[3] = Sample::new(t, v);

        Ok(true)
    }
}

/// A single in-memory series: immutable identity plus locked state
#[derive(Debug)]
pub struct MemSeries {
    ref_id: SeriesRef,
    lset: LabelSet,
    state: RwLock<SeriesState>,
}

impl MemSeries {
    /// Create an empty series
    pub fn new(ref_id: SeriesRef, lset: LabelSet) -> Self {
        Self {
            ref_id,
            lset,
            state: RwLock::new(SeriesState {
                chunks: Vec::new(),
                last_value: 0.0,
                sample_buf: [Sample::default(); 4],
            }),
        }
    }

    /// The reference assigned at creation
    pub fn ref_id(&self) -> SeriesRef {
        self.ref_id
    }

    /// The series' label set
    pub fn lset(&self) -> &LabelSet {
        &self.lset
    }

    pub(crate) fn state(&self) -> &RwLock<SeriesState> {
        &self.state
    }

    /// Append a sample, cutting a new chunk when the head chunk is full.
    ///
    /// Returns `Ok(false)` when the sample duplicates the newest
    /// timestamp with a different value, `Err(OutOfBounds)` when the
    /// series has no room for another chunk.
    pub fn append(&self, t: Timestamp, v: f64) -> Result<bool> {
        self.state.write().append(t, v)
    }

    /// Number of chunks
    pub fn num_chunks(&self) -> usize {
        self.state.read().chunks.len()
    }

    /// Snapshot of the newest chunk; `None` before the first append
    pub fn head_chunk(&self) -> Option<SafeChunk> {
        let n = self.state.read().chunks.len();
        if n == 0 {
            None
        } else {
            self.chunk(n - 1).ok()
        }
    }

    /// Snapshot chunk `i` for reading.
    ///
    /// The snapshot is taken under the series lock and stays consistent
    /// while appends continue.
    pub fn chunk(&self, i: usize) -> Result<SafeChunk> {
        let state = self.state.read();
        let c = state.chunks.get(i).ok_or(HeadError::OutOfBounds)?;
        let tail = if i + 1 == state.chunks.len() {
            Some(state.sample_buf)
        } else {
            None
        };
        Ok(SafeChunk {
            chunk: c.chunk.clone(),
            samples: c.samples,
            min_time: c.min_time,
            max_time: c.max_time,
            tail,
        })
    }

    /// Iterate over chunk `i`
    pub fn iterator(&self, i: usize) -> Result<SampleIterator> {
        Ok(self.chunk(i)?.iter())
    }
}

/// Read handle over one chunk, decoupled from the series lock.
///
/// For the newest chunk the handle also carries the series' tail
/// buffer; its iterator serves the last few samples from there instead
/// of the codec, so readers never depend on decoding the in-progress
/// tail of the bit stream.
#[derive(Debug, Clone)]
pub struct SafeChunk {
    chunk: XorChunk,
    samples: usize,
    min_time: Timestamp,
    max_time: Timestamp,
    tail: Option<[Sample; 4]>,
}

impl SafeChunk {
    /// Minimum timestamp
    pub fn min_time(&self) -> Timestamp {
        self.min_time
    }

    /// Maximum timestamp
    pub fn max_time(&self) -> Timestamp {
        self.max_time
    }

    /// Number of samples
    pub fn num_samples(&self) -> usize {
        self.samples
    }

    /// Encoded size in bytes
    pub fn num_bytes(&self) -> usize {
        self.chunk.bytes().len()
    }

    /// Iterate over the chunk's samples
    pub fn iter(&self) -> SampleIterator {
        match self.tail {
            Some(buf) => SampleIterator::Safe(SafeIterator {
                inner: self.chunk.iter(),
                total: self.samples,
                read: 0,
                buf,
            }),
            None => SampleIterator::Chunk(self.chunk.iter()),
        }
    }
}

/// Iterator over one chunk's samples
#[derive(Debug, Clone)]
pub enum SampleIterator {
    /// Direct codec iterator for sealed chunks
    Chunk(XorIter),
    /// Tail-buffered iterator for the newest chunk
    Safe(SafeIterator),
}

impl Iterator for SampleIterator {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        match self {
            SampleIterator::Chunk(it) => it.next(),
            SampleIterator::Safe(it) => it.next(),
        }
    }
}

/// Iterator reading the codec body but serving the last
/// `min(4, samples)` samples from the series' tail buffer
#[derive(Debug, Clone)]
pub struct SafeIterator {
    inner: XorIter,
    total: usize,
    read: usize,
    buf: [Sample; 4],
}

impl Iterator for SafeIterator {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.read >= self.total {
            return None;
        }
        let idx = self.read;
        self.read += 1;
        if self.total - idx > 4 {
            self.inner.next()
        } else {
            Some(self.buf[4 - (self.total - idx)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_series() -> MemSeries {
        MemSeries::new(0, LabelSet::from_pairs(&[("__name__", "x")]))
    }

    #[test]
    fn test_append_and_iterate() {
        let s = new_series();
        for i in 0..100i64 {
            assert!(s.append(i * 10, i as f64).unwrap());
        }

        let got: Vec<_> = s.iterator(0).unwrap().collect();
        assert_eq!(got.len(), 100);
        assert_eq!(got[0], Sample::new(0, 0.0));
        assert_eq!(got[99], Sample::new(990, 99.0));
    }

    #[test]
    fn test_tail_buffer_short_chunk() {
        let s = new_series();
        assert!(s.head_chunk().is_none());
        s.append(10, 1.0).unwrap();
        s.append(20, 2.0).unwrap();

        // Fewer samples than the tail buffer holds; all come from it.
        let got: Vec<_> = s.iterator(0).unwrap().collect();
        assert_eq!(got, vec![Sample::new(10, 1.0), Sample::new(20, 2.0)]);

        let head = s.head_chunk().unwrap();
        assert_eq!(head.min_time(), 10);
        assert_eq!(head.max_time(), 20);
        assert_eq!(head.num_samples(), 2);
    }

    #[test]
    fn test_duplicate_timestamp() {
        let s = new_series();
        assert!(s.append(10, 1.0).unwrap());

        // Conflicting value at the newest timestamp is skipped.
        assert!(!s.append(10, 2.0).unwrap());

        // An equal pair is appended again.
        assert!(s.append(10, 1.0).unwrap());

        let got: Vec<_> = s.iterator(0).unwrap().collect();
        assert_eq!(got, vec![Sample::new(10, 1.0), Sample::new(10, 1.0)]);
    }

    #[test]
    fn test_cut_at_chunk_target() {
        let s = new_series();
        for i in 0..config::SAMPLES_PER_CHUNK as i64 {
            s.append(i, 1.0).unwrap();
        }
        assert_eq!(s.num_chunks(), 1);

        s.append(config::SAMPLES_PER_CHUNK as i64, 2.0).unwrap();
        assert_eq!(s.num_chunks(), 2);

        let state = s.state().read();
        assert_eq!(state.chunks[0].samples, config::SAMPLES_PER_CHUNK);
        assert_eq!(state.chunks[1].samples, 1);
        assert!(state.chunks[0].max_time <= state.chunks[1].min_time);
        assert_eq!(state.chunks[1].min_time, config::SAMPLES_PER_CHUNK as i64);

        // The sealed chunk iterates straight from the codec.
        let first: Vec<_> = s.iterator(0).unwrap().collect();
        assert_eq!(first.len(), config::SAMPLES_PER_CHUNK);
        assert_eq!(first[0], Sample::new(0, 1.0));
    }

    #[test]
    fn test_chunk_capacity() {
        let s = new_series();
        {
            let mut state = s.state().write();
            for i in 0..config::MAX_CHUNKS_PER_SERIES as i64 {
                let mut c = MemChunk::new(i);
                c.samples = config::SAMPLES_PER_CHUNK;
                c.max_time = i;
                state.chunks.push(c);
            }
        }
        assert!(matches!(
            s.append(1_000_000, 1.0),
            Err(HeadError::OutOfBounds)
        ));
    }

    #[test]
    fn test_safe_iterator_mixes_codec_and_buffer() {
        let s = new_series();
        for i in 0..20i64 {
            s.append(i, i as f64).unwrap();
        }
        let handle = s.chunk(0).unwrap();

        // Keep appending after the snapshot; the handle is unaffected.
        for i in 20..40i64 {
            s.append(i, i as f64).unwrap();
        }

        let got: Vec<_> = handle.iter().collect();
        assert_eq!(got.len(), 20);
        for (i, sample) in got.iter().enumerate() {
            assert_eq!(*sample, Sample::new(i as i64, i as f64));
        }
    }
}
