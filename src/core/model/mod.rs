use crate::core::codec::{self, MAX_K};
use crate::core::error::TopKError;
use std::cmp::Ordering;

pub const DEFAULT_PASS_PREFIX: usize = 2;
// Caps keep the per-pass table vector (4^B entries) small.
pub const DEFAULT_BUCKET_PREFIX_CAP: usize = 8;
pub const MAX_BUCKET_PREFIX: usize = 10;
pub const MAX_PASS_PREFIX: usize = 12;

/// Approximate resident bytes per counted suffix in a `HashMap<u64, u64>`.
pub const BYTES_PER_ENTRY: u64 = 32;

/// How a k-mer index is split into pass prefix, bucket prefix and suffix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KmerLayout {
    pub k: usize,
    pub pass_prefix: usize,
    pub bucket_prefix: usize,
    pub suffix: usize,
}

impl KmerLayout {
    /// Derives the split for k-mer length `k`.
    ///
    /// Without an explicit pass prefix, `min(2, k)` is used. Without an
    /// explicit bucket prefix, half of the remaining length (rounded down,
    /// capped at [`DEFAULT_BUCKET_PREFIX_CAP`]) is used.
    pub fn new(
        k: usize,
        pass_prefix: Option<usize>,
        bucket_prefix: Option<usize>,
    ) -> Result<Self, TopKError> {
        if k == 0 {
            return Err(TopKError::invalid_parameter("k-mer length must be > 0"));
        }
        if k > MAX_K {
            return Err(TopKError::invalid_parameter(format!(
                "k-mer length must be <= {MAX_K}, got {k}"
            )));
        }
        let pass_prefix = pass_prefix.unwrap_or(DEFAULT_PASS_PREFIX.min(k));
        if pass_prefix > MAX_PASS_PREFIX {
            return Err(TopKError::invalid_parameter(format!(
                "pass prefix must be <= {MAX_PASS_PREFIX}, got {pass_prefix}"
            )));
        }
        if pass_prefix > k {
            return Err(TopKError::invalid_parameter(format!(
                "pass prefix {pass_prefix} is longer than k-mer length {k}"
            )));
        }
        let bucket_prefix =
            bucket_prefix.unwrap_or(((k - pass_prefix) / 2).min(DEFAULT_BUCKET_PREFIX_CAP));
        if bucket_prefix > MAX_BUCKET_PREFIX {
            return Err(TopKError::invalid_parameter(format!(
                "bucket prefix must be <= {MAX_BUCKET_PREFIX}, got {bucket_prefix}"
            )));
        }
        if pass_prefix + bucket_prefix > k {
            return Err(TopKError::invalid_parameter(format!(
                "pass prefix {pass_prefix} + bucket prefix {bucket_prefix} exceed k-mer length {k}"
            )));
        }
        Ok(Self {
            k,
            pass_prefix,
            bucket_prefix,
            suffix: k - pass_prefix - bucket_prefix,
        })
    }

    pub fn passes(&self) -> u64 {
        codec::space_size(self.pass_prefix)
    }

    pub fn buckets(&self) -> usize {
        codec::space_size(self.bucket_prefix) as usize
    }

    #[inline(always)]
    pub fn pass_of(&self, code: u64) -> u64 {
        code >> (2 * (self.bucket_prefix + self.suffix))
    }

    /// `(pass, bucket, suffix)` indices of a full k-mer index.
    #[inline(always)]
    pub fn split(&self, code: u64) -> (u64, usize, u64) {
        let suffix_bits = 2 * self.suffix;
        let suffix = code & (codec::space_size(self.suffix) - 1);
        let bucket = (code >> suffix_bits) & (codec::space_size(self.bucket_prefix) - 1);
        (self.pass_of(code), bucket as usize, suffix)
    }

    #[inline(always)]
    pub fn join(&self, pass: u64, bucket: usize, suffix: u64) -> u64 {
        let code = (pass << (2 * self.bucket_prefix)) | bucket as u64;
        (code << (2 * self.suffix)) | suffix
    }

    /// Splits a k-mer string by encoding each of its three parts.
    pub fn split_kmer(&self, kmer: &[u8]) -> Result<(u64, usize, u64), TopKError> {
        if kmer.len() != self.k {
            return Err(TopKError::invalid_parameter(format!(
                "expected a {}-mer, got {} symbols",
                self.k,
                kmer.len()
            )));
        }
        let (pass_part, rest) = kmer.split_at(self.pass_prefix);
        let (bucket_part, suffix_part) = rest.split_at(self.bucket_prefix);
        let shifted = |e: TopKError, by: usize| match e {
            TopKError::InvalidSymbol { symbol, position } => TopKError::InvalidSymbol {
                symbol,
                position: position + by,
            },
            other => other,
        };
        let pass = codec::encode(pass_part)?;
        let bucket = codec::encode(bucket_part).map_err(|e| shifted(e, self.pass_prefix))?;
        let suffix = codec::encode(suffix_part)
            .map_err(|e| shifted(e, self.pass_prefix + self.bucket_prefix))?;
        Ok((pass, bucket as usize, suffix))
    }

    /// Full k-mer string from its parts: `decode(pass) ++ decode(bucket) ++ decode(suffix)`.
    pub fn kmer_string(&self, pass: u64, bucket: usize, suffix: u64) -> String {
        let mut out = Vec::with_capacity(self.k);
        codec::decode_into(pass, self.pass_prefix, &mut out);
        codec::decode_into(bucket as u64, self.bucket_prefix, &mut out);
        codec::decode_into(suffix, self.suffix, &mut out);
        String::from_utf8(out).unwrap_or_default()
    }
}

/// A counted k-mer inside the reducer and the accumulator.
///
/// Orders by count descending, then by k-mer index ascending, which is
/// lexicographic order on the k-mer string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Ranked {
    pub count: u64,
    pub kmer: u64,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .count
            .cmp(&self.count)
            .then_with(|| self.kmer.cmp(&other.kmer))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KmerCount {
    pub kmer: String,
    pub count: u64,
}

/// Smallest pass prefix whose estimated per-pass tables fit `budget_bytes`.
///
/// `estimated_kmers` is an upper bound on k-mer occurrences in the corpus;
/// distinct k-mers can never exceed it nor `4^k`.
pub fn plan_pass_prefix(k: usize, estimated_kmers: u64, budget_bytes: u64) -> usize {
    let distinct = if k >= 31 {
        estimated_kmers
    } else {
        estimated_kmers.min(codec::space_size(k))
    };
    let need = distinct.saturating_mul(BYTES_PER_ENTRY);
    let limit = k.min(MAX_PASS_PREFIX);
    (0..=limit)
        .find(|&p| need >> (2 * p) <= budget_bytes)
        .unwrap_or(limit)
}
