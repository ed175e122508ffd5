use crate::core::counting::CountTable;
use crate::core::model::{KmerLayout, Ranked};

/// The best entries of one bucket, ordered as [`Ranked`] orders them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BucketTopList {
    pub pass: u64,
    pub bucket: usize,
    pub entries: Vec<Ranked>,
}

/// Keeps the `top_k` highest counts of a bucket and rebuilds their full
/// k-mer indices. Everything below the cut is discarded.
pub fn reduce_bucket(
    table: CountTable,
    layout: &KmerLayout,
    pass: u64,
    bucket: usize,
    top_k: usize,
) -> BucketTopList {
    let mut entries: Vec<Ranked> = table
        .into_iter()
        .map(|(suffix, count)| Ranked {
            count,
            kmer: layout.join(pass, bucket, suffix),
        })
        .collect();
    if top_k == 0 {
        entries.clear();
    } else if entries.len() > top_k {
        entries.select_nth_unstable(top_k - 1);
        entries.truncate(top_k);
    }
    entries.sort_unstable();
    BucketTopList {
        pass,
        bucket,
        entries,
    }
}
