//! D-RATS RPC Library
//!
//! Remote procedure calls between D-RATS stations: one station submits a
//! typed job, the other runs it against its local action provider and
//! acknowledges with a result dictionary.
//!
//! # Architecture
//!
//! - **RpcJob**: the job contract, plus the stock job types (file list,
//!   file pull/delete, message list/pull, position report, version, mail
//!   check)
//! - **JobRegistry**: tag to constructor table for incoming requests;
//!   unknown tags are rejected
//! - **RpcActions**: what a station does for remote jobs; `FileActions` is
//!   the filesystem-backed provider
//! - **RpcSessionCore**: sequence numbers, the pending table, request/ack
//!   matching, timeouts
//! - **run_rpc_session**: tokio actor that owns a core and drives its worker
//!
//! Requests are frames of type 0 carrying `<tag> GS <args>`; acks are type 1
//! carrying the encoded result, with the request's sequence number.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use rats_rpc::{ActionsConfig, FileActions, PullFileJob, RpcSessionConfig, RpcSessionCore};
//! use tokio::sync::mpsc;
//!
//! let (action_tx, _actions_rx) = mpsc::unbounded_channel();
//! let actions = Arc::new(FileActions::new(ActionsConfig::default(), "radio", action_tx));
//!
//! let (frame_tx, mut frames) = mpsc::unbounded_channel();
//! let (mut session, _events) =
//!     RpcSessionCore::new(RpcSessionConfig::new("W1AW"), actions, frame_tx);
//!
//! let mut job = PullFileJob::new("KK7DS", "Fetch the net log");
//! job.set_file("netlog.txt");
//! let seq = session.submit(Box::new(job)).unwrap();
//!
//! let request = frames.try_recv().unwrap();
//! assert_eq!(request.seq, seq);
//! assert_eq!(request.d_station, "KK7DS");
//! ```

pub mod actions;
pub mod actor;
pub mod error;
pub mod job;
pub mod jobs;
pub mod registry;
pub mod session;

pub use actions::{
    ActionEvent, ActionsConfig, FileActions, MailDone, MailGateway, MessageEntry, MessageStore,
    PositionSource, RpcActions,
};
pub use actor::{run_rpc_session, RpcSessionCommand, RpcSessionHandle};
pub use error::RpcError;
pub use job::{Completion, JobBase, JobCompleter, JobState, RpcJob};
pub use jobs::{
    CheckMailJob, DeleteFileJob, FileListJob, FormListJob, GetVersionJob, MailAccount,
    PositionReportJob, PullFileJob, PullFormJob,
};
pub use registry::{JobFactory, JobRegistry, REMOTE_JOB_DESC};
pub use session::{
    FrameOutlet, JobEvent, RpcSessionConfig, RpcSessionCore, T_RPC, T_RPCACK, T_RPCREQ,
};
