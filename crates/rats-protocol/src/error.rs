//! Error types for D-RATS frame and RPC dictionary encoding

use thiserror::Error;

/// Errors that can occur while parsing link data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is incomplete - need more data
    #[error("incomplete data: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// Block is not wrapped in `[SOB]`/`[EOB]`
    #[error("block has no header/trailer")]
    MissingDelimiters,

    /// yEncode escape byte at the very end of the buffer
    #[error("truncated escape sequence at offset {0}")]
    TruncatedEscape(usize),

    /// Magic byte is neither compressed nor plain
    #[error("magic 0x{0:02X} not recognized")]
    UnknownMagic(u8),

    /// Checksum mismatch
    #[error("checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// Compressed payload could not be inflated
    #[error("failed to inflate payload: {0}")]
    Inflate(String),
}

/// Errors raised while encoding or decoding an RPC dictionary
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcDictError {
    /// Key cannot be carried by the separator encoding
    #[error("cannot encode dict key {0:?}")]
    InvalidKey(String),

    /// Value cannot be carried by the separator encoding
    #[error("cannot encode dict value for key {key:?}")]
    InvalidValue { key: String },

    /// Entry without a key/value separator
    #[error("malformed dict encoding: {0:?}")]
    Malformed(String),
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// RPC dictionary error
    #[error("rpc dict error: {0}")]
    Dict(#[from] RpcDictError),

    /// Payload does not fit the 16-bit length field
    #[error("payload of {0} bytes exceeds frame limit")]
    PayloadTooLarge(usize),
}
