//! The routable unit of data carried over a link

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reserved all-stations callsign
pub const BROADCAST_CALL: &str = "CQCQCQ";

/// Reserved no-op destination (warm-up frames); never routed
pub const NOOP_CALL: &str = "!";

/// Session id used for chat and raw GPS sentences
pub const SESSION_CHAT: u8 = 1;

/// Flag set by a transport once the frame's bytes have left the host
///
/// Clones share the flag, so a session can keep a marker for a frame it has
/// handed to a transport and observe when it goes out.
#[derive(Debug, Clone, Default)]
pub struct SentMarker(Arc<AtomicBool>);

impl SentMarker {
    /// Create an unset marker
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as physically transmitted
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the frame has been transmitted
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One routable frame
///
/// Frames are deliberately not `Clone`: a frame resent to a second path must
/// go through [`Frame::fresh_copy`], which gives the copy its own
/// [`SentMarker`].
#[derive(Debug)]
pub struct Frame {
    /// Source callsign
    pub s_station: String,
    /// Destination callsign, [`BROADCAST_CALL`] or [`NOOP_CALL`]
    pub d_station: String,
    /// Session / session-type id
    pub session: u8,
    /// Per-session discriminant (request/ack for RPC)
    pub frame_type: u8,
    /// Sequence number
    pub seq: u16,
    /// Payload, always uncompressed in memory
    pub data: Vec<u8>,
    /// Deflate the payload on the wire
    pub compressed: bool,
    sent: SentMarker,
}

impl Frame {
    /// Create a frame with session, type and sequence zeroed
    ///
    /// New frames are compressed on the wire unless
    /// [`with_compression`](Self::with_compression) turns it off.
    pub fn new(s_station: impl Into<String>, d_station: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            s_station: s_station.into(),
            d_station: d_station.into(),
            session: 0,
            frame_type: 0,
            seq: 0,
            data,
            compressed: true,
            sent: SentMarker::new(),
        }
    }

    /// Builder-style wire compression
    pub fn with_compression(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Builder-style session id
    pub fn with_session(mut self, session: u8) -> Self {
        self.session = session;
        self
    }

    /// Builder-style frame type
    pub fn with_type(mut self, frame_type: u8) -> Self {
        self.frame_type = frame_type;
        self
    }

    /// Builder-style sequence number
    pub fn with_seq(mut self, seq: u16) -> Self {
        self.seq = seq;
        self
    }

    /// Independent copy with an unset sent marker
    pub fn fresh_copy(&self) -> Frame {
        Frame {
            s_station: self.s_station.clone(),
            d_station: self.d_station.clone(),
            session: self.session,
            frame_type: self.frame_type,
            seq: self.seq,
            data: self.data.clone(),
            compressed: self.compressed,
            sent: SentMarker::new(),
        }
    }

    /// Handle on this frame's sent marker
    pub fn sent_marker(&self) -> SentMarker {
        self.sent.clone()
    }

    /// Mark this frame as transmitted
    pub fn mark_sent(&self) {
        self.sent.mark();
    }

    /// Whether this frame has been transmitted
    pub fn is_sent(&self) -> bool {
        self.sent.is_set()
    }

    /// Frame addressed to the reserved no-op destination
    pub fn is_noop(&self) -> bool {
        self.d_station == NOOP_CALL
    }

    /// Raw NMEA/APRS sentence broadcast on the chat session
    pub fn is_gps_beacon(&self) -> bool {
        self.s_station == BROADCAST_CALL
            && self.d_station == BROADCAST_CALL
            && self.session == SESSION_CHAT
            && self.data.first() == Some(&b'$')
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self
            .data
            .iter()
            .take(20)
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
            .collect();
        write!(
            f,
            "DDT2{}: {}:{}:{} {}->{} ({}...[{}])",
            if self.compressed { '+' } else { '-' },
            self.seq,
            self.session,
            self.frame_type,
            self.s_station,
            self.d_station,
            preview,
            self.data.len()
        )
    }
}
