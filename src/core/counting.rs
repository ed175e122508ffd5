use crate::core::codec::KmerWindows;
use crate::core::corpus::SeqBatch;
use crate::core::error::TopKError;
use crate::core::model::KmerLayout;
use crate::core::reduce::{self, BucketTopList};
use std::collections::HashMap;

/// Occurrence counts of one bucket, keyed by suffix index.
pub type CountTable = HashMap<u64, u64>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanStats {
    pub records: u64,
    pub short_records: u64,
    pub bases: u64,
    pub windows: u64,
    pub invalid_windows: u64,
    /// Occurrences added to this counter's tables.
    pub counted: u64,
}

/// Exact k-mer counts for one pass.
///
/// A counter may be one of several lanes splitting the pass: lane `w` of
/// `lanes` owns the buckets `b` with `b % lanes == w` and ignores the rest,
/// so lanes never share a table.
pub struct PassCounter {
    layout: KmerLayout,
    pass: u64,
    lane: usize,
    lanes: usize,
    tables: Vec<CountTable>,
    stats: ScanStats,
}

impl PassCounter {
    pub fn new(layout: KmerLayout, pass: u64) -> Self {
        Self::for_lane(layout, pass, 0, 1)
    }

    pub fn for_lane(layout: KmerLayout, pass: u64, lane: usize, lanes: usize) -> Self {
        debug_assert!(pass < layout.passes());
        debug_assert!(lanes > 0 && lane < lanes);
        let buckets = layout.buckets();
        let owned = buckets / lanes + usize::from(lane < buckets % lanes);
        Self {
            layout,
            pass,
            lane,
            lanes,
            tables: (0..owned).map(|_| CountTable::new()).collect(),
            stats: ScanStats::default(),
        }
    }

    #[inline(always)]
    pub fn owns(&self, bucket: usize) -> bool {
        bucket % self.lanes == self.lane
    }

    pub fn count_batch(&mut self, batch: &SeqBatch) {
        for seq in batch.iter() {
            self.count_sequence(seq);
        }
    }

    /// Counts every window of one record that falls into this pass.
    pub fn count_sequence(&mut self, seq: &[u8]) {
        self.stats.records += 1;
        self.stats.bases += seq.len() as u64;
        if seq.len() < self.layout.k {
            self.stats.short_records += 1;
            return;
        }
        for window in KmerWindows::new(seq, self.layout.k) {
            self.stats.windows += 1;
            match window {
                Some(code) => {
                    self.add_code(code);
                }
                None => self.stats.invalid_windows += 1,
            }
        }
    }

    /// Counts one explicit k-mer. Returns whether it belonged to this
    /// counter (its pass and, for lanes, its bucket).
    pub fn observe(&mut self, kmer: &[u8]) -> Result<bool, TopKError> {
        let (pass, bucket, suffix) = self.layout.split_kmer(kmer)?;
        if pass != self.pass || !self.owns(bucket) {
            return Ok(false);
        }
        self.bump(bucket, suffix);
        Ok(true)
    }

    #[inline(always)]
    fn add_code(&mut self, code: u64) -> bool {
        let (pass, bucket, suffix) = self.layout.split(code);
        if pass != self.pass || !self.owns(bucket) {
            return false;
        }
        self.bump(bucket, suffix);
        true
    }

    #[inline(always)]
    fn bump(&mut self, bucket: usize, suffix: u64) {
        *self.tables[bucket / self.lanes].entry(suffix).or_insert(0) += 1;
        self.stats.counted += 1;
    }

    /// Count recorded for a k-mer, if it was seen by this counter.
    pub fn count_of(&self, kmer: &[u8]) -> Option<u64> {
        let (pass, bucket, suffix) = self.layout.split_kmer(kmer).ok()?;
        if pass != self.pass || !self.owns(bucket) {
            return None;
        }
        self.tables[bucket / self.lanes].get(&suffix).copied()
    }

    /// Distinct k-mers counted so far.
    pub fn distinct(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Reduces every non-empty bucket to its top `top_k` list, dropping
    /// the tables.
    pub fn into_top_lists(self, top_k: usize) -> (Vec<BucketTopList>, ScanStats) {
        let PassCounter {
            layout,
            pass,
            lane,
            lanes,
            tables,
            stats,
        } = self;
        let lists = tables
            .into_iter()
            .enumerate()
            .filter(|(_, t)| !t.is_empty())
            .map(|(slot, table)| {
                let bucket = slot * lanes + lane;
                reduce::reduce_bucket(table, &layout, pass, bucket, top_k)
            })
            .collect();
        (lists, stats)
    }
}
