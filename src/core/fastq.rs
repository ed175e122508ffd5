use memchr::memchr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub byte_offset: usize,
    pub kind: ParseErrorKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseErrorKind {
    MissingHeader,
    MissingSeparator,
    TruncatedRecord,
    QualityLengthMismatch,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            ParseErrorKind::MissingHeader => "expected '@' header line",
            ParseErrorKind::MissingSeparator => "expected '+' separator line",
            ParseErrorKind::TruncatedRecord => "truncated record",
            ParseErrorKind::QualityLengthMismatch => "quality length differs from sequence length",
        };
        write!(f, "{} at offset {}", what, self.byte_offset)
    }
}

impl std::error::Error for ParseError {}

struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    /// Next line without its terminator (`\n` or `\r\n`) and its start offset.
    fn next_line(&mut self) -> Option<(usize, &'a [u8])> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.data[start..];
        let (mut line, advance) = match memchr(b'\n', rest) {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        if let [head @ .., b'\r'] = line {
            line = head;
        }
        self.pos += advance;
        Some((start, line))
    }
}

/// Appends the sequence line of every FASTQ record in `data` to `out`.
///
/// `data` must start on a record boundary. Blank lines between records are
/// ignored; `base_offset` is added to reported error offsets.
pub fn parse_chunk<'a>(
    data: &'a [u8],
    base_offset: usize,
    out: &mut Vec<&'a [u8]>,
) -> Result<(), ParseError> {
    let mut lines = Lines { data, pos: 0 };
    let err = |at: usize, kind| ParseError {
        byte_offset: base_offset + at,
        kind,
    };
    loop {
        let header = loop {
            match lines.next_line() {
                None => return Ok(()),
                Some((_, l)) if l.is_empty() => continue,
                Some(h) => break h,
            }
        };
        if header.1[0] != b'@' {
            return Err(err(header.0, ParseErrorKind::MissingHeader));
        }
        let Some((_, seq)) = lines.next_line() else {
            return Err(err(data.len(), ParseErrorKind::TruncatedRecord));
        };
        let Some((plus_at, plus)) = lines.next_line() else {
            return Err(err(data.len(), ParseErrorKind::TruncatedRecord));
        };
        if plus.first() != Some(&b'+') {
            return Err(err(plus_at, ParseErrorKind::MissingSeparator));
        }
        let Some((qual_at, qual)) = lines.next_line() else {
            return Err(err(data.len(), ParseErrorKind::TruncatedRecord));
        };
        if qual.len() != seq.len() {
            return Err(err(qual_at, ParseErrorKind::QualityLengthMismatch));
        }
        out.push(seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sequences() {
        let data = b"@r1\nACGT\n+\nIIII\n@r2\nGGA\n+r2\nIII\n";
        let mut out = Vec::new();
        parse_chunk(data, 0, &mut out).unwrap();
        assert_eq!(out, vec![&b"ACGT"[..], &b"GGA"[..]]);
    }

    #[test]
    fn accepts_crlf_and_missing_final_newline() {
        let data = b"@r1\r\nACGT\r\n+\r\nIIII\r\n@r2\r\nTT\r\n+\r\nII";
        let mut out = Vec::new();
        parse_chunk(data, 0, &mut out).unwrap();
        assert_eq!(out, vec![&b"ACGT"[..], &b"TT"[..]]);
    }

    #[test]
    fn skips_blank_lines_between_records() {
        let data = b"@r1\nAC\n+\nII\n\n\n@r2\nGT\n+\nII\n\n";
        let mut out = Vec::new();
        parse_chunk(data, 0, &mut out).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn reports_offsets() {
        let mut out = Vec::new();
        let e = parse_chunk(b"@r1\nAC\n+\nII\nxx\n", 100, &mut out).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::MissingHeader);
        assert_eq!(e.byte_offset, 112);

        let e = parse_chunk(b"@r1\nAC\n-\nII\n", 0, &mut out).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::MissingSeparator);
        assert_eq!(e.byte_offset, 7);

        let e = parse_chunk(b"@r1\nAC\n", 0, &mut out).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::TruncatedRecord);
    }

    #[test]
    fn quality_must_match_sequence_length() {
        let mut out = Vec::new();
        let e = parse_chunk(b"@r1\nACGT\n+\nIII\n", 50, &mut out).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::QualityLengthMismatch);
        assert_eq!(e.byte_offset, 61);
        assert!(out.is_empty());

        let e = parse_chunk(b"@r1\nAC\r\n+\r\nIII\r\n", 0, &mut out).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::QualityLengthMismatch);
    }
}
