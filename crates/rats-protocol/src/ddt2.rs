//! DDT2 block encoding
//!
//! A frame on the wire is a 25-byte big-endian header followed by the payload:
//!
//! ```text
//! magic:u8 seq:u16 session:u8 type:u8 checksum:u16 length:u16 src:[u8;8] dst:[u8;8]
//! ```
//!
//! Callsigns are right-padded with `~`. The magic byte tells whether the payload
//! is zlib-compressed (`0xDD`) or plain (`0x22`). The packed bytes are
//! yEncoded and wrapped in `[SOB]` / `[EOB]` so blocks can be found in a noisy
//! byte stream.
//!
//! Frames are deflated at level 9 by default. The checksum and length cover
//! the payload as it appears on the wire, so a compressed frame is checked
//! before it is inflated. [`Frame::data`] always holds the plain bytes.

use miniz_oxide::deflate::compress_to_vec_zlib;
use miniz_oxide::inflate::decompress_to_vec_zlib_with_limit;
use tracing::{debug, warn};

use crate::error::{ParseError, ProtocolError};
use crate::frame::{Frame, NOOP_CALL};
use crate::yencode::{ydecode, yencode};

/// Start-of-block marker
pub const ENCODED_HEADER: &[u8] = b"[SOB]";

/// End-of-block marker
pub const ENCODED_TRAILER: &[u8] = b"[EOB]";

/// Packed header length
pub const HEADER_LEN: usize = 25;

/// Magic byte for compressed payloads
pub const MAGIC_COMPRESSED: u8 = 0xDD;

/// Magic byte for plain payloads
pub const MAGIC_PLAIN: u8 = 0x22;

/// Frame type used by warm-up frames
pub const WARMUP_TYPE: u8 = 254;

const CALL_LEN: usize = 8;
const CALL_PAD: u8 = b'~';
const CHECKSUM_AT: usize = 5;

/// zlib level used for outgoing frames
const COMPRESSION_LEVEL: u8 = 9;

/// Largest payload accepted after inflating
const MAX_INFLATED_LEN: usize = 1024 * 1024;

/// Scanner buffer cap; older bytes are dropped once exceeded
const MAX_BUFFER_LEN: usize = 256 * 1024;

/// Feed one byte into the D-RATS CRC-16 (polynomial 0x1021)
pub fn update_crc(byte: u8, mut crc: u16) -> u16 {
    let mut c = byte as u32;
    for _ in 0..8 {
        c <<= 1;
        let v = u16::from(c & 0x100 != 0);
        if crc & 0x8000 != 0 {
            crc = ((crc << 1) + v) ^ 0x1021;
        } else {
            crc = (crc << 1) + v;
        }
    }
    crc
}

/// D-RATS checksum of a buffer (two trailing zero bytes flush the register)
pub fn calc_checksum(data: &[u8]) -> u16 {
    let crc = data.iter().fold(0u16, |crc, &b| update_crc(b, crc));
    update_crc(0, update_crc(0, crc))
}

fn pad_call(call: &str) -> [u8; CALL_LEN] {
    let mut out = [CALL_PAD; CALL_LEN];
    // Stations are ISO-8859-1 on the wire
    for (slot, ch) in out.iter_mut().zip(call.chars()) {
        *slot = u32::from(ch).try_into().unwrap_or(b'?');
    }
    out
}

fn unpad_call(raw: &[u8]) -> String {
    raw.iter()
        .filter(|&&b| b != CALL_PAD)
        .map(|&b| b as char)
        .collect()
}

fn header(frame: &Frame, magic: u8, checksum: u16, length: u16) -> [u8; HEADER_LEN] {
    let mut hdr = [0u8; HEADER_LEN];
    hdr[0] = magic;
    hdr[1..3].copy_from_slice(&frame.seq.to_be_bytes());
    hdr[3] = frame.session;
    hdr[4] = frame.frame_type;
    hdr[CHECKSUM_AT..CHECKSUM_AT + 2].copy_from_slice(&checksum.to_be_bytes());
    hdr[7..9].copy_from_slice(&length.to_be_bytes());
    hdr[9..17].copy_from_slice(&pad_call(&frame.s_station));
    hdr[17..25].copy_from_slice(&pad_call(&frame.d_station));
    hdr
}

/// Pack a frame into header + payload (no yEncode, no markers)
pub fn pack_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let (magic, payload) = if frame.compressed {
        (
            MAGIC_COMPRESSED,
            compress_to_vec_zlib(&frame.data, COMPRESSION_LEVEL),
        )
    } else {
        (MAGIC_PLAIN, frame.data.clone())
    };
    let length = u16::try_from(payload.len())
        .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut packed = header(frame, magic, 0, length).to_vec();
    packed.extend_from_slice(&payload);
    let checksum = calc_checksum(&packed);
    packed[CHECKSUM_AT..CHECKSUM_AT + 2].copy_from_slice(&checksum.to_be_bytes());
    Ok(packed)
}

/// Unpack header + payload into a frame, verifying the checksum
///
/// Compressed payloads are inflated after the checksum passes.
pub fn unpack_frame(raw: &[u8]) -> Result<Frame, ParseError> {
    let Some(&magic) = raw.first() else {
        return Err(ParseError::Incomplete { needed: HEADER_LEN });
    };
    let compressed = match magic {
        MAGIC_COMPRESSED => true,
        MAGIC_PLAIN => false,
        other => return Err(ParseError::UnknownMagic(other)),
    };
    if raw.len() < HEADER_LEN {
        return Err(ParseError::Incomplete {
            needed: HEADER_LEN - raw.len(),
        });
    }

    let checksum = u16::from_be_bytes([raw[CHECKSUM_AT], raw[CHECKSUM_AT + 1]]);
    let mut zeroed = raw.to_vec();
    zeroed[CHECKSUM_AT..CHECKSUM_AT + 2].fill(0);
    let computed = calc_checksum(&zeroed);
    if computed != checksum {
        return Err(ParseError::ChecksumMismatch {
            expected: checksum,
            actual: computed,
        });
    }

    let payload = &raw[HEADER_LEN..];
    let data = if compressed {
        decompress_to_vec_zlib_with_limit(payload, MAX_INFLATED_LEN)
            .map_err(|e| ParseError::Inflate(format!("{:?}", e.status)))?
    } else {
        payload.to_vec()
    };

    Ok(Frame::new(unpad_call(&raw[9..17]), unpad_call(&raw[17..25]), data)
        .with_seq(u16::from_be_bytes([raw[1], raw[2]]))
        .with_session(raw[3])
        .with_type(raw[4])
        .with_compression(compressed))
}

/// Encode a frame as a `[SOB]…[EOB]` block
pub fn encode_block(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let packed = pack_frame(frame)?;
    let mut block = ENCODED_HEADER.to_vec();
    block.extend_from_slice(&yencode(&packed));
    block.extend_from_slice(ENCODED_TRAILER);
    Ok(block)
}

/// Decode a `[SOB]…[EOB]` block
pub fn decode_block(block: &[u8]) -> Result<Frame, ParseError> {
    let start = find(block, ENCODED_HEADER).ok_or(ParseError::MissingDelimiters)?
        + ENCODED_HEADER.len();
    let end = rfind(block, ENCODED_TRAILER).ok_or(ParseError::MissingDelimiters)?;
    if end < start {
        return Err(ParseError::MissingDelimiters);
    }
    let packed = ydecode(&block[start..end])?;
    unpack_frame(&packed)
}

/// Warm-up frame sent ahead of traffic on an idle link
///
/// Sent plain so its on-air length is the requested length.
pub fn warmup_frame(length: usize) -> Frame {
    Frame::new(NOOP_CALL, NOOP_CALL, vec![0x01; length])
        .with_type(WARMUP_TYPE)
        .with_compression(false)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Streaming block extractor
///
/// Push raw link bytes in; complete `[SOB]…[EOB]` blocks come out. A trailer
/// seen before any header is discarded.
#[derive(Debug, Default)]
pub struct BlockScanner {
    buffer: Vec<u8>,
}

impl BlockScanner {
    /// Create an empty scanner
    pub fn new() -> Self {
        Self::default()
    }

    /// Push raw bytes into the scanner's buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_BUFFER_LEN {
            let excess = self.buffer.len() - MAX_BUFFER_LEN;
            warn!("Block buffer overflow, dropping {} bytes", excess);
            self.buffer.drain(..excess);
        }
    }

    /// Extract the next complete block, markers included
    pub fn next_block(&mut self) -> Option<Vec<u8>> {
        loop {
            let start = find(&self.buffer, ENCODED_HEADER)?;
            let trailer = find(&self.buffer, ENCODED_TRAILER)?;
            let end = trailer + ENCODED_TRAILER.len();

            if trailer < start {
                debug!("Discarding orphan trailer at offset {}", trailer);
                self.buffer.drain(trailer..end);
                continue;
            }

            let block = self.buffer[start..end].to_vec();
            self.buffer.drain(..end);
            return Some(block);
        }
    }

    /// Extract and decode the next block
    ///
    /// Broken blocks are returned as `Some(Err(_))` so the caller can log them
    /// and keep scanning.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ParseError>> {
        self.next_block().map(|block| decode_block(&block))
    }

    /// Bytes waiting in the buffer
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Take whatever is buffered (data that never formed a block)
    pub fn take_unconverted(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
