//! The contract the repeater needs from a link
//!
//! A transport owns one byte-stream endpoint, does its own framing and hands
//! each decoded [`Frame`] to an installed handler. The repeater only needs to
//! send frames, check whether the link is alive, and tell links apart.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rats_protocol::Frame;

use crate::error::RepeaterError;

/// Callback invoked for every frame a transport receives
pub type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;

/// Process-unique transport identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One attached link ("path")
pub trait Transport: Send + Sync {
    /// Identity used for path comparisons
    fn id(&self) -> TransportId;

    /// Human-readable name (device string or peer address)
    fn name(&self) -> &str;

    /// Whether the link still carries traffic
    fn is_enabled(&self) -> bool;

    /// Stop the link; further sends are refused
    fn disable(&self);

    /// Queue a frame for transmission without blocking
    fn send_frame(&self, frame: Frame) -> Result<(), RepeaterError>;

    /// Install (or clear) the receive handler
    fn set_inhandler(&self, handler: Option<FrameHandler>);
}
