//! Position mapping between series insertion order and label-sorted order
//!
//! Series references are handed out in insertion order, which keeps
//! postings lists monotonic and cheap to intersect. Query results are
//! wanted in label-sorted order for merging across blocks. The mapper
//! holds the permutation between the two, rebuilt lazily after the
//! series list grows.

use crate::series::MemSeries;
use crate::types::SeriesRef;
use std::sync::Arc;

/// Bijection between insertion-order references and sorted ranks.
///
/// `iv[rank]` is the reference at that sorted rank; `fw[ref]` is the
/// rank of that reference.
#[derive(Debug, Default)]
pub struct PositionMapper {
    len: usize,
    iv: Vec<SeriesRef>,
    fw: Vec<SeriesRef>,
}

impl PositionMapper {
    /// Create an empty mapper
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of series covered by the current mapping
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the mapping covers no series
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the mapping no longer covers the series list
    pub fn is_stale(&self, series_len: usize) -> bool {
        self.len != series_len
    }

    /// Rebuild the mapping from the series list. O(n log n).
    pub fn update(&mut self, series: &[Arc<MemSeries>]) {
        let mut iv: Vec<SeriesRef> = (0..series.len() as SeriesRef).collect();
        iv.sort_by(|&a, &b| series[a as usize].lset().cmp(series[b as usize].lset()));

        let mut fw = vec![0 as SeriesRef; series.len()];
        for (rank, &orig) in iv.iter().enumerate() {
            fw[orig as usize] = rank as SeriesRef;
        }

        self.iv = iv;
        self.fw = fw;
        self.len = series.len();
    }

    /// Stable-sort a reference list into label-sorted order.
    ///
    /// The result is no longer monotonic in raw reference and must not
    /// be fed back into intersect or merge.
    pub fn sort_refs(&self, refs: &mut [SeriesRef]) {
        refs.sort_by_key(|&r| self.fw.get(r as usize).copied().unwrap_or(SeriesRef::MAX));
    }
}
