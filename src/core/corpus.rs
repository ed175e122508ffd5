//! Rewindable sources of sequence records.
//!
//! Every pass of the counter reads the whole corpus from its start, so a
//! corpus hands out a fresh [`BatchStream`] on each [`Corpus::scan`] call.

use crate::core::error::TopKError;
use crate::core::fastq;
use crate::core::io::{
    CHUNK_SIZE, ChunkData, ChunkReader, ChunkTiming, InputKind, MappedFile, detect_input_kind,
};
use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sequences of consecutive records, stored back to back.
#[derive(Clone, Debug, Default)]
pub struct SeqBatch {
    bases: Vec<u8>,
    ends: Vec<usize>,
    pub timing: ChunkTiming,
}

impl SeqBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, seq: &[u8]) {
        self.bases.extend_from_slice(seq);
        self.ends.push(self.bases.len());
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn total_bases(&self) -> usize {
        self.bases.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let starts = std::iter::once(0).chain(self.ends.iter().copied());
        starts
            .zip(self.ends.iter().copied())
            .map(|(s, e)| &self.bases[s..e])
    }
}

pub trait BatchStream {
    /// Next batch, or `None` once the corpus is exhausted.
    fn next_batch(&mut self) -> Result<Option<SeqBatch>>;
}

pub trait Corpus {
    /// Human-readable name for log lines and errors.
    fn name(&self) -> String;

    /// Restarts the corpus from its first record.
    fn scan(&self) -> Result<Box<dyn BatchStream + '_>>;
}

/// Records held in memory.
#[derive(Clone, Debug)]
pub struct MemoryCorpus {
    records: Vec<Vec<u8>>,
    batch_records: usize,
}

impl MemoryCorpus {
    pub fn new<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            records: records.into_iter().map(|r| r.as_ref().to_vec()).collect(),
            batch_records: 4096,
        }
    }

    pub fn with_batch_records(mut self, n: usize) -> Self {
        self.batch_records = n.max(1);
        self
    }
}

struct MemoryStream<'a> {
    records: &'a [Vec<u8>],
    batch_records: usize,
}

impl BatchStream for MemoryStream<'_> {
    fn next_batch(&mut self) -> Result<Option<SeqBatch>> {
        if self.records.is_empty() {
            return Ok(None);
        }
        let take = self.batch_records.min(self.records.len());
        let (head, rest) = self.records.split_at(take);
        self.records = rest;
        let mut batch = SeqBatch::new();
        for r in head {
            batch.push(r);
        }
        batch.timing.bytes = batch.total_bases();
        Ok(Some(batch))
    }
}

impl Corpus for MemoryCorpus {
    fn name(&self) -> String {
        format!("memory({} records)", self.records.len())
    }

    fn scan(&self) -> Result<Box<dyn BatchStream + '_>> {
        Ok(Box::new(MemoryStream {
            records: &self.records,
            batch_records: self.batch_records,
        }))
    }
}

/// A FASTQ file, plain or gzip-compressed, reopened on every scan.
#[derive(Clone, Debug)]
pub struct FastqCorpus {
    path: PathBuf,
    kind: InputKind,
    file_len: u64,
    threads: usize,
    chunk_size: usize,
}

impl FastqCorpus {
    pub fn open(path: &Path, threads: usize) -> Result<Self> {
        let unreadable = |reason: String| TopKError::UnreadableSource {
            path: path.to_path_buf(),
            reason,
        };
        let meta = fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;
        if !meta.is_file() {
            return Err(unreadable("not a regular file".to_string()).into());
        }
        let kind = detect_input_kind(path).map_err(|e| unreadable(format!("{e:#}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            file_len: meta.len(),
            threads: threads.max(1),
            chunk_size: CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Rough upper bound on k-mer occurrences, from the file size.
    ///
    /// About half of a FASTQ file is sequence; gzip is assumed to shrink
    /// FASTQ about fourfold.
    pub fn estimated_kmers(&self) -> u64 {
        match self.kind {
            InputKind::Plain => self.file_len / 2,
            InputKind::Gzip => self.file_len.saturating_mul(2),
        }
    }
}

struct FastqStream<'a> {
    path: &'a Path,
    input: Option<ChunkReader>,
    mmap: Option<Arc<MappedFile>>,
}

impl BatchStream for FastqStream<'_> {
    fn next_batch(&mut self) -> Result<Option<SeqBatch>> {
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };
        let Some(chunk) = input.next_chunk()? else {
            return Ok(None);
        };
        let slice = match &chunk.data {
            ChunkData::Mapped { start, end } => {
                let source = self
                    .mmap
                    .as_ref()
                    .ok_or_else(|| anyhow!("mmap source missing for chunk {}", chunk.index))?;
                &source.bytes()[*start..*end]
            }
            ChunkData::Owned(data) => data.as_slice(),
        };
        let mut seqs = Vec::new();
        fastq::parse_chunk(slice, chunk.offset, &mut seqs).with_context(|| {
            format!(
                "FASTQ parse error in {} (chunk {})",
                self.path.display(),
                chunk.index
            )
        })?;
        let mut batch = SeqBatch::new();
        for s in seqs {
            batch.push(s);
        }
        batch.timing = chunk.timing;
        Ok(Some(batch))
    }
}

impl Corpus for FastqCorpus {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn scan(&self) -> Result<Box<dyn BatchStream + '_>> {
        // Nothing to map in an empty file.
        if self.kind == InputKind::Plain && self.file_len == 0 {
            return Ok(Box::new(FastqStream {
                path: &self.path,
                input: None,
                mmap: None,
            }));
        }
        let (input, mmap) = ChunkReader::open(&self.path, self.kind, self.threads, self.chunk_size)
            .map_err(|e| TopKError::UnreadableSource {
                path: self.path.clone(),
                reason: format!("{e:#}"),
            })?;
        Ok(Box::new(FastqStream {
            path: &self.path,
            input: Some(input),
            mmap,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(corpus: &dyn Corpus) -> Vec<Vec<u8>> {
        let mut stream = corpus.scan().unwrap();
        let mut out = Vec::new();
        while let Some(batch) = stream.next_batch().unwrap() {
            out.extend(batch.iter().map(|s| s.to_vec()));
        }
        out
    }

    #[test]
    fn batch_iterates_in_order() {
        let mut b = SeqBatch::new();
        b.push(b"ACGT");
        b.push(b"");
        b.push(b"TT");
        let got: Vec<&[u8]> = b.iter().collect();
        assert_eq!(got, vec![&b"ACGT"[..], &b""[..], &b"TT"[..]]);
        assert_eq!(b.len(), 3);
        assert_eq!(b.total_bases(), 6);
    }

    #[test]
    fn memory_corpus_rescans_from_start() {
        let c = MemoryCorpus::new(["AC", "GT", "TTT"]).with_batch_records(2);
        let first = drain(&c);
        let second = drain(&c);
        assert_eq!(first, vec![b"AC".to_vec(), b"GT".to_vec(), b"TTT".to_vec()]);
        assert_eq!(first, second);
    }

    #[test]
    fn fastq_corpus_reads_sequences_every_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.fastq");
        std::fs::write(&path, "@a\nACGT\n+\nIIII\n@b\nGG\n+\nII\n").unwrap();
        let c = FastqCorpus::open(&path, 1).unwrap().with_chunk_size(8);
        assert_eq!(drain(&c), vec![b"ACGT".to_vec(), b"GG".to_vec()]);
        assert_eq!(drain(&c), vec![b"ACGT".to_vec(), b"GG".to_vec()]);
    }

    #[test]
    fn empty_fastq_is_an_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.fastq");
        std::fs::write(&path, "").unwrap();
        let c = FastqCorpus::open(&path, 1).unwrap();
        assert!(drain(&c).is_empty());
    }

    #[test]
    fn missing_file_is_unreadable() {
        let err = FastqCorpus::open(Path::new("/nonexistent/reads.fastq"), 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TopKError>(),
            Some(TopKError::UnreadableSource { .. })
        ));
    }

    #[test]
    fn malformed_fastq_fails_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fastq");
        std::fs::write(&path, "@a\nACGT\nIIII\n").unwrap();
        let c = FastqCorpus::open(&path, 1).unwrap();
        let mut stream = c.scan().unwrap();
        assert!(stream.next_batch().is_err());
    }
}
