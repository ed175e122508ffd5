use crate::core::model::Ranked;
use crate::core::reduce::BucketTopList;
use std::collections::BTreeSet;

/// The running global top-K across all buckets of all passes.
///
/// Holds at most `capacity` entries after every merge. Truncating each
/// bucket to K entries before merging loses nothing: a bucket can place
/// at most K k-mers in the global top-K, and those are its own K best.
#[derive(Clone, Debug)]
pub struct GlobalTopK {
    capacity: usize,
    entries: BTreeSet<Ranked>,
}

impl GlobalTopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeSet::new(),
        }
    }

    pub fn merge(&mut self, list: &BucketTopList) {
        for &r in &list.entries {
            // Once full, anything ranking at or below the current last cannot enter.
            if self.entries.len() >= self.capacity {
                match self.entries.last() {
                    Some(last) if r < *last => {}
                    _ => continue,
                }
            }
            self.entries.insert(r);
            while self.entries.len() > self.capacity {
                self.entries.pop_last();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lowest count currently retained.
    pub fn min_count(&self) -> Option<u64> {
        self.entries.last().map(|r| r.count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ranked> + '_ {
        self.entries.iter()
    }

    pub fn into_sorted_vec(self) -> Vec<Ranked> {
        self.entries.into_iter().collect()
    }
}
