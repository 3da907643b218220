//! Flat string dictionary encoding for RPC payloads
//!
//! Entries are joined with the ASCII record separator, and each key is
//! joined to its value with the unit separator:
//!
//! ```text
//! key US value RS key US value ...
//! ```
//!
//! The control bytes never occur in message text, so nothing is escaped.
//! Keys or values that contain them are rejected at encode time; binary data
//! must be pre-encoded (base64 or similar) by the caller.

use std::collections::BTreeMap;

use crate::error::RpcDictError;

/// ASCII group separator: splits the job tag from its arguments
pub const ASCII_GS: u8 = 0x1D;
/// ASCII record separator: splits entries
pub const ASCII_RS: u8 = 0x1E;
/// ASCII unit separator: splits a key from its value
pub const ASCII_US: u8 = 0x1F;

/// String-keyed dictionary of string values
pub type RpcDict = BTreeMap<String, String>;

fn has_separator(s: &str) -> bool {
    s.bytes().any(|b| matches!(b, ASCII_GS | ASCII_RS | ASCII_US))
}

/// Encode a dictionary
pub fn encode_dict(dict: &RpcDict) -> Result<Vec<u8>, RpcDictError> {
    let mut out = Vec::new();
    for (i, (key, value)) in dict.iter().enumerate() {
        if has_separator(key) {
            return Err(RpcDictError::InvalidKey(key.clone()));
        }
        if has_separator(value) {
            return Err(RpcDictError::InvalidValue { key: key.clone() });
        }
        if i > 0 {
            out.push(ASCII_RS);
        }
        out.extend_from_slice(key.as_bytes());
        out.push(ASCII_US);
        out.extend_from_slice(value.as_bytes());
    }
    Ok(out)
}

/// Decode a dictionary; empty input yields an empty dictionary
pub fn decode_dict(raw: &[u8]) -> Result<RpcDict, RpcDictError> {
    let mut dict = RpcDict::new();
    if raw.is_empty() {
        return Ok(dict);
    }

    let text = String::from_utf8_lossy(raw);
    for entry in text.split(ASCII_RS as char) {
        let (key, value) = entry
            .split_once(ASCII_US as char)
            .ok_or_else(|| RpcDictError::Malformed(entry.to_string()))?;
        dict.insert(key.to_string(), value.to_string());
    }
    Ok(dict)
}

/// Coerce raw bytes into a dictionary value (invalid UTF-8 is replaced)
pub fn value_from_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Pluggable dictionary wire format
///
/// Sessions hold a `Box<dyn DictCodec>` so peers speaking a different
/// encoding can be served without touching job logic.
pub trait DictCodec: Send + Sync {
    /// Encode a dictionary to wire bytes
    fn encode(&self, dict: &RpcDict) -> Result<Vec<u8>, RpcDictError>;

    /// Decode wire bytes to a dictionary
    fn decode(&self, raw: &[u8]) -> Result<RpcDict, RpcDictError>;
}

/// The D-RATS separator encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct SeparatorCodec;

impl DictCodec for SeparatorCodec {
    fn encode(&self, dict: &RpcDict) -> Result<Vec<u8>, RpcDictError> {
        encode_dict(dict)
    }

    fn decode(&self, raw: &[u8]) -> Result<RpcDict, RpcDictError> {
        decode_dict(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, &str)]) -> RpcDict {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_single_entry_wire_format() {
        let encoded = encode_dict(&dict(&[("fn", "test.txt")])).unwrap();
        assert_eq!(encoded, b"fn\x1ftest.txt");
        assert_eq!(decode_dict(&encoded).unwrap(), dict(&[("fn", "test.txt")]));
    }

    #[test]
    fn test_multiple_entries_joined_by_rs() {
        let encoded = encode_dict(&dict(&[("a", "1"), ("b", "")])).unwrap();
        assert_eq!(encoded, b"a\x1f1\x1eb\x1f");
    }

    #[test]
    fn test_empty_input() {
        assert!(decode_dict(b"").unwrap().is_empty());
        assert!(encode_dict(&RpcDict::new()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_unit_separator_is_malformed() {
        assert_eq!(
            decode_dict(b"fn\x1fa\x1ebroken"),
            Err(RpcDictError::Malformed("broken".to_string()))
        );
    }

    #[test]
    fn test_separator_in_key_rejected() {
        let err = encode_dict(&dict(&[("f\x1fn", "x")])).unwrap_err();
        assert!(matches!(err, RpcDictError::InvalidKey(_)));
    }

    #[test]
    fn test_separator_in_value_rejected() {
        let err = encode_dict(&dict(&[("fn", "a\x1eb")])).unwrap_err();
        assert_eq!(err, RpcDictError::InvalidValue { key: "fn".into() });
    }

    #[test]
    fn test_decode_splits_on_first_unit_separator() {
        let decoded = decode_dict(b"k\x1fa\x1fb\x1en\x1fx\x1dy").unwrap();
        assert_eq!(decoded["k"], "a\x1fb");
        assert_eq!(decoded["n"], "x\x1dy");
    }

    #[test]
    fn test_decoded_separator_values_do_not_reencode() {
        let decoded = decode_dict(b"k\x1fa\x1fb").unwrap();
        assert_eq!(
            encode_dict(&decoded),
            Err(RpcDictError::InvalidValue { key: "k".into() })
        );
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let decoded = decode_dict(b"k\x1f\xffv").unwrap();
        assert_eq!(decoded["k"], "\u{fffd}v");
        assert_eq!(value_from_bytes(b"ok"), "ok");
    }
}
