//! Error types for the repeater

use thiserror::Error;

/// Errors that can occur while relaying frames
#[derive(Debug, Error)]
pub enum RepeaterError {
    /// The link has been disabled and accepts no more frames
    #[error("link {0} is disabled")]
    LinkDisabled(String),

    /// The link's outgoing queue is full
    #[error("outgoing queue full on {0}")]
    QueueFull(String),

    /// A device string could not be parsed
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending device string
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// The repeater was stopped and cannot be started again
    #[error("repeater has been stopped")]
    Stopped,

    /// The accept loop is already running
    #[error("repeater is already running")]
    AlreadyRunning,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serial port error
    #[error("serial error: {0}")]
    SerialError(#[from] tokio_serial::Error),

    /// Protocol error
    #[error("protocol error: {0}")]
    ProtocolError(#[from] rats_protocol::ProtocolError),
}
