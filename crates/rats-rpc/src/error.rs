//! Error types for RPC jobs and sessions

use rats_protocol::RpcDictError;
use thiserror::Error;

/// Errors that can occur while encoding, dispatching or tracking RPC jobs
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The job tag is not in the registry
    #[error("unknown call `{0}'")]
    UnknownCall(String),

    /// A state string that is not one of the job states
    #[error("invalid status `{0}'")]
    InvalidStatus(String),

    /// A request payload without the tag separator
    #[error("malformed RPC call from {0}")]
    MalformedCall(String),

    /// A job argument is missing or not in the expected form
    #[error("bad argument `{key}': {reason}")]
    BadArgument {
        /// Argument name
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Dictionary encoding error
    #[error("dictionary error: {0}")]
    Dict(#[from] RpcDictError),

    /// The frame sink refused a frame
    #[error("frame outlet closed")]
    OutletClosed,

    /// Every sequence number is held by a pending job
    #[error("no free sequence numbers")]
    SequenceExhausted,

    /// The session has been stopped
    #[error("session stopped")]
    SessionStopped,
}
