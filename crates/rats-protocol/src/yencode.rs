//! yEncode byte stuffing
//!
//! Bytes that radios or TNCs treat specially (XON/XOFF, SUB, NUL and the
//! `0xFD..=0xFF` range) are replaced by `=` followed by the byte plus 64.
//! The escape byte itself is always escaped.

use crate::error::ParseError;

/// Bytes escaped by default on radio links
pub const DEFAULT_BANNED: &[u8] = b"\x11\x13\x1A\x00\xFD\xFE\xFF";

/// Escape byte
pub const ESCAPE: u8 = b'=';

/// Offset added to an escaped byte
pub const OFFSET: u8 = 64;

/// Encode `buf` escaping [`DEFAULT_BANNED`]
pub fn yencode(buf: &[u8]) -> Vec<u8> {
    yencode_with(buf, DEFAULT_BANNED)
}

/// Encode `buf` escaping `banned` (the escape byte is always added)
pub fn yencode_with(buf: &[u8], banned: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + buf.len() / 8);
    for &b in buf {
        if b == ESCAPE || banned.contains(&b) {
            out.push(ESCAPE);
            out.push(b.wrapping_add(OFFSET));
        } else {
            out.push(b);
        }
    }
    out
}

/// Decode a yEncoded buffer
pub fn ydecode(buf: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(buf.len());
    let mut iter = buf.iter().enumerate();
    while let Some((i, &b)) = iter.next() {
        if b == ESCAPE {
            let (_, &next) = iter.next().ok_or(ParseError::TruncatedEscape(i))?;
            out.push(next.wrapping_sub(OFFSET));
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banned_bytes_are_escaped() {
        let encoded = yencode(b"\x11a=");
        assert_eq!(encoded, b"=Qa=}");
        assert!(!encoded.iter().any(|b| DEFAULT_BANNED.contains(b)));
    }

    #[test]
    fn test_high_bytes_wrap() {
        // 0xFF + 64 wraps to 0x3F ('?')
        assert_eq!(yencode(&[0xFF]), b"=?");
        assert_eq!(ydecode(b"=?").unwrap(), vec![0xFF]);
    }

    #[test]
    fn test_all_bytes_survive() {
        let input: Vec<u8> = (0..=255).collect();
        assert_eq!(ydecode(&yencode(&input)).unwrap(), input);
    }

    #[test]
    fn test_truncated_escape() {
        assert_eq!(ydecode(b"abc="), Err(ParseError::TruncatedEscape(3)));
    }
}
