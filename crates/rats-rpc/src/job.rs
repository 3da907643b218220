//! The RPC job contract
//!
//! A job is a typed unit of remote work. It carries only a flat dictionary
//! of string arguments, so it can be packed into a request frame, unpacked
//! on the remote station, and executed there against an [`RpcActions`]
//! provider.

use std::fmt;
use std::str::FromStr;

use rats_protocol::{DictCodec, RpcDict, RpcDictError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::actions::RpcActions;
use crate::error::RpcError;

/// Lifecycle of a job
///
/// `Running` is implicit; `Complete` and `Timeout` are terminal and reached
/// at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Submitted, no answer yet
    Running,
    /// Answered by the remote station
    Complete,
    /// No answer within the retry window
    Timeout,
}

impl JobState {
    /// Wire/display name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Timeout => "timeout",
        }
    }

    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobState::Running),
            "complete" => Ok(JobState::Complete),
            "timeout" => Ok(JobState::Timeout),
            other => Err(RpcError::InvalidStatus(other.to_string())),
        }
    }
}

/// Fields every job carries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobBase {
    dest: String,
    desc: String,
    pub(crate) args: RpcDict,
}

impl JobBase {
    /// Create with empty arguments
    pub fn new(dest: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            dest: dest.into(),
            desc: desc.into(),
            args: RpcDict::new(),
        }
    }
}

/// A deferred job result, delivered to the session that executed the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Session-local id of the executing job
    pub token: u64,
    /// Result dictionary sent back in the ack
    pub result: RpcDict,
}

/// Handle an action keeps to answer a job later
///
/// Consumed on use, so one completer answers at most once.
#[derive(Debug)]
pub struct JobCompleter {
    token: u64,
    tx: mpsc::UnboundedSender<Completion>,
}

impl JobCompleter {
    pub(crate) fn new(token: u64, tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self { token, tx }
    }

    /// A completer whose answers go nowhere
    pub fn detached() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { token: 0, tx }
    }

    /// Complete the job with `result`
    pub fn complete(self, result: RpcDict) {
        let completion = Completion {
            token: self.token,
            result,
        };
        if self.tx.send(completion).is_err() {
            debug!("Session gone, dropping completion for job {}", self.token);
        }
    }
}

/// A typed RPC job
pub trait RpcJob: Send + fmt::Debug {
    /// Registry tag, sent on the wire ahead of the arguments
    fn tag(&self) -> &'static str;

    /// Shared fields
    fn base(&self) -> &JobBase;

    /// Shared fields, mutably
    fn base_mut(&mut self) -> &mut JobBase;

    /// Run against the local action provider
    ///
    /// `None` means the result will arrive later through `completer`.
    fn do_action(&self, actions: &dyn RpcActions, completer: JobCompleter) -> Option<RpcDict>;

    /// Station the job is addressed to (or, remotely, came from)
    fn dest(&self) -> &str {
        &self.base().dest
    }

    /// Human description
    fn desc(&self) -> &str {
        &self.base().desc
    }

    /// Argument dictionary
    fn args(&self) -> &RpcDict {
        &self.base().args
    }

    /// Encode the arguments
    fn pack(&self, codec: &dyn DictCodec) -> Result<Vec<u8>, RpcDictError> {
        codec.encode(self.args())
    }

    /// Replace the arguments with decoded `raw`
    fn unpack(&mut self, raw: &[u8], codec: &dyn DictCodec) -> Result<(), RpcDictError> {
        self.base_mut().args = codec.decode(raw)?;
        Ok(())
    }
}
