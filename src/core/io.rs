//! Chunked access to FASTQ bytes: memory-mapped for plain files, streamed
//! through a decoder for gzip. Every chunk ends on a record boundary.

use anyhow::{Context, Result, anyhow};
use flate2::read::MultiGzDecoder;
use gzp::deflate::{Bgzf, Mgzip};
use gzp::par::decompress::ParDecompressBuilder;
use memchr::memchr_iter;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const CHUNK_SIZE: usize = 16 * 1024 * 1024;
const GZIP_READ_BUF: usize = 8 * 1024 * 1024;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A plain FASTQ file mapped read-only for the length of one scan.
pub struct MappedFile {
    map: Mmap,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_file(path)?;
        // SAFETY: read-only file mapping.
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mmap of {} failed", path.display()))?;
        Ok(Self { map })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    Plain,
    Gzip,
}

#[derive(Clone, Debug)]
pub enum ChunkData {
    /// Byte range of the mapped file.
    Mapped { start: usize, end: usize },
    /// Decompressed bytes.
    Owned(Vec<u8>),
}

/// A run of whole FASTQ records.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub index: usize,
    /// Offset of the first byte in the (decompressed) input stream.
    pub offset: usize,
    pub data: ChunkData,
    pub timing: ChunkTiming,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkTiming {
    pub bytes: usize,
    pub decompress: Duration,
    pub align: Duration,
}

/// Follows FASTQ record structure across newlines so chunk cuts land where
/// the parser expects a header. Blank lines are skipped between records
/// only; inside a record every line counts.
#[derive(Clone, Copy, Debug, Default)]
struct RecordLines {
    lines: usize,
    line_start: usize,
}

impl RecordLines {
    fn starting_at(line_start: usize) -> Self {
        Self {
            lines: 0,
            line_start,
        }
    }

    /// Consumes the line ending at newline `nl`; true when the next byte
    /// starts a record.
    fn end_line(&mut self, bytes: &[u8], nl: usize) -> bool {
        let blank = matches!(&bytes[self.line_start..nl], [] | [b'\r']);
        self.line_start = nl + 1;
        if !(blank && self.lines % 4 == 0) {
            self.lines += 1;
        }
        self.lines % 4 == 0
    }
}

pub struct MmapChunker {
    data: Arc<MappedFile>,
    pos: usize,
    chunk_size: usize,
    index: usize,
}

impl MmapChunker {
    pub fn new(data: Arc<MappedFile>, chunk_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk_size: chunk_size.max(1),
            index: 0,
        }
    }

    pub fn next_chunk(&mut self) -> Option<Chunk> {
        let bytes = self.data.bytes();
        let len = bytes.len();
        if self.pos >= len {
            return None;
        }
        let t_align = Instant::now();
        let start = self.pos;
        let target = start.saturating_add(self.chunk_size);
        let mut end = len;
        let mut record = RecordLines::starting_at(start);
        for nl in memchr_iter(b'\n', &bytes[start..]) {
            let after = start + nl + 1;
            if record.end_line(bytes, start + nl) && after >= target {
                end = after;
                break;
            }
        }
        self.pos = end;
        let chunk = Chunk {
            index: self.index,
            offset: start,
            data: ChunkData::Mapped { start, end },
            timing: ChunkTiming {
                bytes: end - start,
                decompress: Duration::ZERO,
                align: t_align.elapsed(),
            },
        };
        self.index += 1;
        Some(chunk)
    }
}

pub struct GzipChunker {
    decoder: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    read_buf: Vec<u8>,
    chunk_size: usize,
    index: usize,
    eof: bool,
    scan_pos: usize,
    record: RecordLines,
    cut: Option<usize>,
    emitted: usize,
    acc_decompress: Duration,
    acc_align: Duration,
}

impl GzipChunker {
    pub fn open(path: &Path, chunk_size: usize, threads: usize) -> Result<Self> {
        let decoder = open_gzip_reader(path, threads)?;
        let chunk_size = chunk_size.max(1);
        Ok(Self {
            decoder,
            buffer: Vec::with_capacity(chunk_size.min(CHUNK_SIZE) + (chunk_size.min(CHUNK_SIZE) / 4)),
            read_buf: vec![0u8; GZIP_READ_BUF.min(chunk_size.max(64 * 1024))],
            chunk_size,
            index: 0,
            eof: false,
            scan_pos: 0,
            record: RecordLines::default(),
            cut: None,
            emitted: 0,
            acc_decompress: Duration::ZERO,
            acc_align: Duration::ZERO,
        })
    }

    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            if let Some(at) = self.cut {
                return Ok(Some(self.emit(at)));
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                // Whatever is left is the final (possibly newline-less) record.
                let all = self.buffer.len();
                return Ok(Some(self.emit(all)));
            }

            let t_read = Instant::now();
            let n = self.decoder.read(&mut self.read_buf).with_context(|| {
                format!(
                    "gzip decompression error at chunk {} (offset {})",
                    self.index,
                    self.emitted + self.buffer.len()
                )
            })?;
            self.acc_decompress += t_read.elapsed();
            if n == 0 {
                self.eof = true;
                continue;
            }
            self.buffer.extend_from_slice(&self.read_buf[..n]);
            self.scan();
        }
    }

    /// Looks for the first record boundary at or past `chunk_size`.
    fn scan(&mut self) {
        if self.cut.is_some() {
            return;
        }
        let t_align = Instant::now();
        let from = self.scan_pos;
        self.scan_pos = self.buffer.len();
        for nl in memchr_iter(b'\n', &self.buffer[from..]) {
            let after = from + nl + 1;
            if self.record.end_line(&self.buffer, from + nl) && after >= self.chunk_size {
                self.cut = Some(after);
                self.scan_pos = after;
                break;
            }
        }
        self.acc_align += t_align.elapsed();
    }

    fn emit(&mut self, at: usize) -> Chunk {
        let tail = self.buffer.split_off(at);
        let chunk_bytes = std::mem::replace(&mut self.buffer, tail);
        self.scan_pos = 0;
        self.record = RecordLines::default();
        self.cut = None;
        let offset = self.emitted;
        self.emitted += chunk_bytes.len();
        let chunk = Chunk {
            index: self.index,
            offset,
            timing: ChunkTiming {
                bytes: chunk_bytes.len(),
                decompress: self.acc_decompress,
                align: self.acc_align,
            },
            data: ChunkData::Owned(chunk_bytes),
        };
        self.acc_decompress = Duration::ZERO;
        self.acc_align = Duration::ZERO;
        self.index += 1;
        self.scan();
        chunk
    }
}

pub enum ChunkReader {
    Mapped(MmapChunker),
    Gzip(GzipChunker),
}

impl ChunkReader {
    /// Opens `path` from its first byte. Plain input also hands back the
    /// mapping that [`ChunkData::Mapped`] ranges point into.
    pub fn open(
        path: &Path,
        kind: InputKind,
        threads: usize,
        chunk_size: usize,
    ) -> Result<(Self, Option<Arc<MappedFile>>)> {
        match kind {
            InputKind::Plain => {
                let file = Arc::new(MappedFile::open(path)?);
                let chunker = MmapChunker::new(Arc::clone(&file), chunk_size);
                Ok((ChunkReader::Mapped(chunker), Some(file)))
            }
            InputKind::Gzip => {
                let chunker = GzipChunker::open(path, chunk_size, threads)?;
                Ok((ChunkReader::Gzip(chunker), None))
            }
        }
    }

    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        match self {
            ChunkReader::Mapped(chunker) => Ok(chunker.next_chunk()),
            ChunkReader::Gzip(chunker) => chunker.next_chunk(),
        }
    }
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

/// Reads up to `buf.len()` leading bytes; returns how many were read.
fn read_prefix(path: &Path, buf: &mut [u8]) -> Result<usize> {
    let mut file = open_file(path)?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file
            .read(&mut buf[filled..])
            .with_context(|| format!("failed to read header of {}", path.display()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Gzip by extension (`.gz`, `.bgz`) or by magic bytes, plain otherwise.
pub fn detect_input_kind(path: &Path) -> Result<InputKind> {
    let by_ext = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("bgz"));
    if by_ext {
        return Ok(InputKind::Gzip);
    }
    let mut magic = [0u8; 2];
    let n = read_prefix(path, &mut magic)?;
    Ok(if n == 2 && magic == GZIP_MAGIC {
        InputKind::Gzip
    } else {
        InputKind::Plain
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum GzipVariant {
    Standard,
    Mgzip,
    Bgzf,
}

fn gzip_variant_of(header: &[u8]) -> GzipVariant {
    // FEXTRA subfield id at bytes 12..14 tells blocked variants apart.
    if header.len() < 14 || header[..2] != GZIP_MAGIC || header[3] & 4 == 0 {
        return GzipVariant::Standard;
    }
    match (header[12], header[13]) {
        (b'B', b'C') => GzipVariant::Bgzf,
        (b'I', b'G') => GzipVariant::Mgzip,
        _ => GzipVariant::Standard,
    }
}

/// Decoder for a gzip file. Blocked variants decompress on `threads`
/// workers; anything else goes through a single multi-member decoder.
pub fn open_gzip_reader(path: &Path, threads: usize) -> Result<Box<dyn Read + Send>> {
    let mut header = [0u8; 20];
    let n = read_prefix(path, &mut header)?;
    let variant = gzip_variant_of(&header[..n]);
    let reader = BufReader::new(open_file(path)?);
    let reader: Box<dyn Read + Send> = match variant {
        GzipVariant::Bgzf if threads > 1 => Box::new(
            ParDecompressBuilder::<Bgzf>::new()
                .num_threads(threads)
                .map_err(|e| anyhow!("bgzf decoder setup failed: {e}"))?
                .from_reader(reader),
        ),
        GzipVariant::Mgzip if threads > 1 => Box::new(
            ParDecompressBuilder::<Mgzip>::new()
                .num_threads(threads)
                .map_err(|e| anyhow!("mgzip decoder setup failed: {e}"))?
                .from_reader(reader),
        ),
        _ => Box::new(MultiGzDecoder::new(reader)),
    };
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fastq;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn record(i: usize) -> String {
        format!("@read{i}\nACGTACGT\n+\nIIIIIIII\n")
    }

    /// Twenty records plus an empty-sequence record, with blank lines
    /// (LF and CRLF) between some of them.
    fn text_with_blank_lines() -> String {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&record(i));
            match i {
                3 => text.push('\n'),
                7 => text.push_str("@empty\n\n+\n\n"),
                11 => text.push_str("\r\n\n"),
                _ => {}
            }
        }
        text
    }

    fn parsed_records(chunks: &[Vec<u8>]) -> usize {
        let mut total = 0;
        for (i, c) in chunks.iter().enumerate() {
            let mut seqs = Vec::new();
            fastq::parse_chunk(c, 0, &mut seqs).unwrap_or_else(|e| panic!("chunk {i}: {e}"));
            total += seqs.len();
        }
        total
    }

    fn chunk_bytes<'a>(chunk: &'a Chunk, src: &'a [u8]) -> &'a [u8] {
        match &chunk.data {
            ChunkData::Mapped { start, end } => &src[*start..*end],
            ChunkData::Owned(v) => v,
        }
    }

    #[test]
    fn mmap_chunks_end_on_record_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fastq");
        let text: String = (0..10).map(record).collect();
        std::fs::write(&path, &text).unwrap();

        let source = Arc::new(MappedFile::open(&path).unwrap());
        let mut chunker = MmapChunker::new(Arc::clone(&source), 40);
        let mut joined = Vec::new();
        let mut n = 0;
        while let Some(chunk) = chunker.next_chunk() {
            let bytes = chunk_bytes(&chunk, source.bytes());
            assert!(bytes.starts_with(b"@read"));
            assert_eq!(chunk.offset, joined.len());
            joined.extend_from_slice(bytes);
            n += 1;
        }
        assert_eq!(joined, text.as_bytes());
        assert!(n > 1);
    }

    #[test]
    fn gzip_chunks_reassemble_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fastq.gz");
        let text: String = (0..25).map(record).collect();
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();

        assert_eq!(detect_input_kind(&path).unwrap(), InputKind::Gzip);
        let mut chunker = GzipChunker::open(&path, 64, 1).unwrap();
        let mut joined = Vec::new();
        let mut n = 0;
        while let Some(chunk) = chunker.next_chunk().unwrap() {
            let bytes = chunk_bytes(&chunk, &[]).to_vec();
            assert!(bytes.starts_with(b"@read"));
            joined.extend_from_slice(&bytes);
            n += 1;
        }
        assert_eq!(joined, text.as_bytes());
        assert!(n > 1);
    }

    #[test]
    fn plain_file_detected_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.txt");
        std::fs::write(&path, record(0)).unwrap();
        assert_eq!(detect_input_kind(&path).unwrap(), InputKind::Plain);
    }

    #[test]
    fn gzip_variant_from_extra_field() {
        let mut header = [0u8; 16];
        header[0] = 0x1f;
        header[1] = 0x8b;
        header[3] = 4;
        header[12] = b'B';
        header[13] = b'C';
        assert_eq!(gzip_variant_of(&header), GzipVariant::Bgzf);
        header[12] = b'I';
        header[13] = b'G';
        assert_eq!(gzip_variant_of(&header), GzipVariant::Mgzip);
        header[3] = 0;
        assert_eq!(gzip_variant_of(&header), GzipVariant::Standard);
    }

    #[test]
    fn mmap_cuts_skip_blank_lines_between_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fastq");
        let text = text_with_blank_lines();
        std::fs::write(&path, &text).unwrap();
        let source = Arc::new(MappedFile::open(&path).unwrap());

        for chunk_size in 1..=120 {
            let mut chunker = MmapChunker::new(Arc::clone(&source), chunk_size);
            let mut chunks = Vec::new();
            while let Some(chunk) = chunker.next_chunk() {
                chunks.push(chunk_bytes(&chunk, source.bytes()).to_vec());
            }
            assert_eq!(chunks.concat(), text.as_bytes());
            assert_eq!(parsed_records(&chunks), 21, "chunk_size={chunk_size}");
        }
    }

    #[test]
    fn gzip_cuts_skip_blank_lines_between_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fastq.gz");
        let text = text_with_blank_lines();
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();

        for chunk_size in [1, 17, 40, 100, 333] {
            let mut chunker = GzipChunker::open(&path, chunk_size, 1).unwrap();
            let mut chunks = Vec::new();
            while let Some(chunk) = chunker.next_chunk().unwrap() {
                chunks.push(chunk_bytes(&chunk, &[]).to_vec());
            }
            assert_eq!(chunks.concat(), text.as_bytes());
            assert_eq!(parsed_records(&chunks), 21, "chunk_size={chunk_size}");
        }
    }
}
