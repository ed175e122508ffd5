//! Exact top-K k-mer counting in bounded memory.
//!
//! The k-mer space is split by a leading "pass" prefix; the corpus is
//! rescanned once per pass, k-mers of that pass are counted exactly in
//! per-bucket tables, each bucket is cut down to its K best, and the
//! survivors are merged into one global top-K.

pub mod core;
pub mod report;
