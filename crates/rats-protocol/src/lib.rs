//! D-RATS Protocol Library
//!
//! This crate provides the wire formats shared by every D-RATS link:
//!
//! - **Frame**: the routable unit (source, destination, session, type,
//!   sequence, payload)
//! - **DDT2**: the link-level block format (25-byte header, CRC-16,
//!   zlib payload compression, yEncode stuffing, `[SOB]`/`[EOB]` markers) and a
//!   streaming block scanner
//! - **RPC dictionaries**: the flat key/value encoding used by RPC jobs,
//!   delimited by ASCII control separators
//!
//! # Example
//!
//! ```rust
//! use rats_protocol::{ddt2, Frame};
//!
//! let frame = Frame::new("W1AW", "KK7DS", b"hello".to_vec());
//! let block = ddt2::encode_block(&frame).unwrap();
//!
//! let mut scanner = ddt2::BlockScanner::new();
//! scanner.push_bytes(&block);
//! let decoded = scanner.next_frame().unwrap().unwrap();
//! assert_eq!(decoded.d_station, "KK7DS");
//! ```

pub mod ddt2;
pub mod error;
pub mod frame;
pub mod rpc_dict;
pub mod yencode;

pub use ddt2::BlockScanner;
pub use error::{ParseError, ProtocolError, RpcDictError};
pub use frame::{Frame, SentMarker, BROADCAST_CALL, NOOP_CALL, SESSION_CHAT};
pub use rpc_dict::{decode_dict, encode_dict, DictCodec, RpcDict, SeparatorCodec};
