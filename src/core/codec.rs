//! Base-4 index codec for k-mers.
//!
//! A string of `n` symbols maps to an integer in `[0, 4^n)` with the first
//! symbol most significant, so integer order equals lexicographic order
//! (`A < C < G < T`). Lowercase bases fold onto their uppercase values.

use crate::core::error::TopKError;

/// Longest k-mer whose index space `4^k` still fits a `u64`.
pub const MAX_K: usize = 31;

const INVALID: u8 = 0xFF;

static SYMBOL_CODES: [u8; 256] = {
    let mut table = [INVALID; 256];
    table[b'A' as usize] = 0;
    table[b'a' as usize] = 0;
    table[b'C' as usize] = 1;
    table[b'c' as usize] = 1;
    table[b'G' as usize] = 2;
    table[b'g' as usize] = 2;
    table[b'T' as usize] = 3;
    table[b't' as usize] = 3;
    table
};

const SYMBOLS: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// 2-bit value of a symbol, or `None` for anything outside the alphabet.
#[inline(always)]
pub fn symbol_value(b: u8) -> Option<u64> {
    match SYMBOL_CODES[b as usize] {
        INVALID => None,
        v => Some(v as u64),
    }
}

/// Number of distinct strings of `length` symbols.
pub fn space_size(length: usize) -> u64 {
    debug_assert!(length <= MAX_K);
    1u64 << (2 * length)
}

pub fn encode(symbols: &[u8]) -> Result<u64, TopKError> {
    if symbols.len() > MAX_K {
        return Err(TopKError::invalid_parameter(format!(
            "cannot encode {} symbols, at most {} fit an index",
            symbols.len(),
            MAX_K
        )));
    }
    let mut v = 0u64;
    for (position, &b) in symbols.iter().enumerate() {
        let bits = symbol_value(b).ok_or(TopKError::InvalidSymbol {
            symbol: b as char,
            position,
        })?;
        v = (v << 2) | bits;
    }
    Ok(v)
}

pub fn decode(value: u64, length: usize) -> String {
    let mut out = Vec::with_capacity(length);
    decode_into(value, length, &mut out);
    // Only alphabet bytes are written.
    String::from_utf8(out).unwrap_or_default()
}

/// Appends the `length` symbols of `value` to `out`, most significant first.
pub fn decode_into(mut value: u64, length: usize, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + length, b'A');
    for i in (0..length).rev() {
        out[start + i] = SYMBOLS[(value & 0x3) as usize];
        value >>= 2;
    }
}

/// Sliding windows of length `k` over one record.
///
/// Yields one item per start offset `0..=len-k`: `Some(index)` for a window
/// made only of alphabet symbols, `None` for a window covering an invalid
/// byte. Records shorter than `k` yield nothing.
pub struct KmerWindows<'a> {
    seq: &'a [u8],
    k: usize,
    pos: usize,
    code: u64,
    mask: u64,
    valid_run: usize,
}

impl<'a> KmerWindows<'a> {
    pub fn new(seq: &'a [u8], k: usize) -> Self {
        debug_assert!(k > 0 && k <= MAX_K);
        Self {
            seq,
            k,
            pos: 0,
            code: 0,
            mask: space_size(k) - 1,
            valid_run: 0,
        }
    }

    /// Windows this iterator produces in total.
    pub fn window_count(seq_len: usize, k: usize) -> usize {
        if seq_len < k { 0 } else { seq_len - k + 1 }
    }
}

impl Iterator for KmerWindows<'_> {
    type Item = Option<u64>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.seq.len() {
            let b = self.seq[self.pos];
            self.pos += 1;
            match symbol_value(b) {
                Some(bits) => {
                    self.code = ((self.code << 2) | bits) & self.mask;
                    if self.valid_run < self.k {
                        self.valid_run += 1;
                    }
                }
                None => {
                    self.code = 0;
                    self.valid_run = 0;
                }
            }
            if self.pos >= self.k {
                return Some((self.valid_run >= self.k).then_some(self.code));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let start = self.pos.max(self.k - 1);
        let left = self.seq.len().saturating_sub(start);
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_then_encode_covers_every_index() {
        for n in 0..=6 {
            for v in 0..space_size(n) {
                let s = decode(v, n);
                assert_eq!(s.len(), n);
                assert_eq!(encode(s.as_bytes()).unwrap(), v);
            }
        }
    }

    #[test]
    fn encode_then_decode_restores_string() {
        for s in ["A", "T", "ACGT", "GATTACA", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT"] {
            let v = encode(s.as_bytes()).unwrap();
            assert_eq!(decode(v, s.len()), s);
        }
    }

    #[test]
    fn most_significant_symbol_first() {
        assert_eq!(encode(b"A").unwrap(), 0);
        assert_eq!(encode(b"T").unwrap(), 3);
        assert_eq!(encode(b"CA").unwrap(), 4);
        assert_eq!(encode(b"AC").unwrap(), 1);
        assert_eq!(encode(b"TTT").unwrap(), 63);
        assert_eq!(decode(4, 2), "CA");
    }

    #[test]
    fn order_matches_lexicographic_order() {
        let mut words: Vec<String> = (0..space_size(3)).map(|v| decode(v, 3)).collect();
        let by_index = words.clone();
        words.sort();
        assert_eq!(words, by_index);
    }

    #[test]
    fn lowercase_folds_to_uppercase() {
        assert_eq!(encode(b"acgt").unwrap(), encode(b"ACGT").unwrap());
    }

    #[test]
    fn invalid_symbol_is_reported_with_position() {
        assert_eq!(
            encode(b"ACNT"),
            Err(TopKError::InvalidSymbol {
                symbol: 'N',
                position: 2
            })
        );
        assert!(encode(b"AC T").is_err());
    }

    #[test]
    fn too_long_for_an_index() {
        let s = vec![b'A'; MAX_K + 1];
        assert!(matches!(encode(&s), Err(TopKError::InvalidParameter(_))));
    }

    #[test]
    fn windows_include_final_offset() {
        let seq = b"ACGTACGTA";
        let got: Vec<String> = KmerWindows::new(seq, 3)
            .map(|w| decode(w.unwrap(), 3))
            .collect();
        assert_eq!(got, ["ACG", "CGT", "GTA", "TAC", "ACG", "CGT", "GTA"]);
        assert_eq!(KmerWindows::window_count(seq.len(), 3), 7);
    }

    #[test]
    fn windows_of_exact_length_record() {
        let got: Vec<_> = KmerWindows::new(b"GATT", 4).collect();
        assert_eq!(got, vec![Some(encode(b"GATT").unwrap())]);
    }

    #[test]
    fn short_record_has_no_windows() {
        assert_eq!(KmerWindows::new(b"AC", 3).count(), 0);
        assert_eq!(KmerWindows::window_count(2, 3), 0);
    }

    #[test]
    fn windows_over_invalid_bytes_are_marked() {
        let got: Vec<_> = KmerWindows::new(b"ACNGTA", 2).collect();
        assert_eq!(
            got,
            vec![
                Some(encode(b"AC").unwrap()),
                None,
                None,
                Some(encode(b"GT").unwrap()),
                Some(encode(b"TA").unwrap()),
            ]
        );
    }

    #[test]
    fn window_values_match_explicit_encoding() {
        let seq = b"TTGACCAGTACGGATCCA";
        for k in 1..=seq.len() {
            let rolled: Vec<u64> = KmerWindows::new(seq, k).map(|w| w.unwrap()).collect();
            let direct: Vec<u64> = seq.windows(k).map(|w| encode(w).unwrap()).collect();
            assert_eq!(rolled, direct, "k={k}");
        }
    }
}
