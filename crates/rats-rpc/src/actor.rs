//! RPC Session Actor
//!
//! Runs an [`RpcSessionCore`] on a tokio task. Submissions and incoming
//! frames arrive as [`RpcSessionCommand`]s, deferred action results arrive
//! on the core's completion channel, and the worker ticks once per period.
//!
//! # Example
//!
//! ```rust,ignore
//! use rats_rpc::actor::{run_rpc_session, RpcSessionHandle};
//! use tokio::sync::mpsc;
//!
//! let (core, mut events) = RpcSessionCore::new(config, actions, frame_tx);
//! let (cmd_tx, cmd_rx) = mpsc::channel(64);
//! tokio::spawn(run_rpc_session(core, cmd_rx));
//!
//! let handle = RpcSessionHandle::new(cmd_tx);
//! let seq = handle.submit(Box::new(job)).await?;
//! ```

use rats_protocol::Frame;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::RpcError;
use crate::job::{Completion, RpcJob};
use crate::session::RpcSessionCore;

/// Commands sent to the session actor
#[derive(Debug)]
pub enum RpcSessionCommand {
    /// Send a job
    Submit {
        /// Job to send
        job: Box<dyn RpcJob>,
        /// Channel to send back the sequence number
        response: oneshot::Sender<Result<u16, RpcError>>,
    },

    /// A frame arrived for this session
    Incoming {
        /// The frame
        frame: Frame,
    },

    /// A deferred action finished
    Complete {
        /// Its result
        completion: Completion,
    },

    /// Stop the session; pending jobs are abandoned
    Stop,
}

/// Cloneable handle for talking to a running session actor
#[derive(Debug, Clone)]
pub struct RpcSessionHandle {
    cmd_tx: mpsc::Sender<RpcSessionCommand>,
}

impl RpcSessionHandle {
    /// Wrap the actor's command sender
    pub fn new(cmd_tx: mpsc::Sender<RpcSessionCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Submit a job and wait for its sequence number
    pub async fn submit(&self, job: Box<dyn RpcJob>) -> Result<u16, RpcError> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(RpcSessionCommand::Submit { job, response })
            .await
            .map_err(|_| RpcError::SessionStopped)?;
        rx.await.map_err(|_| RpcError::SessionStopped)?
    }

    /// Deliver an incoming frame
    pub async fn incoming(&self, frame: Frame) -> Result<(), RpcError> {
        self.cmd_tx
            .send(RpcSessionCommand::Incoming { frame })
            .await
            .map_err(|_| RpcError::SessionStopped)
    }

    /// Ask the actor to stop
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(RpcSessionCommand::Stop).await;
    }
}

/// Run the session until `Stop` or until every command sender is gone
pub async fn run_rpc_session(
    mut core: RpcSessionCore,
    mut cmd_rx: mpsc::Receiver<RpcSessionCommand>,
) {
    let period = core.config().tick_period();
    let mut worker = interval_at(Instant::now() + period, period);
    worker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Stays open for the actor's lifetime because the core keeps a sender
    let Some(mut completions) = core.take_completion_receiver() else {
        info!("RPC session has no completion channel, not starting");
        return;
    };

    info!("RPC session for {} started", core.config().local_call);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                match cmd {
                    RpcSessionCommand::Submit { job, response } => {
                        let _ = response.send(core.submit(job));
                    }
                    RpcSessionCommand::Incoming { frame } => {
                        core.incoming(frame);
                    }
                    RpcSessionCommand::Complete { completion } => {
                        core.complete(completion);
                    }
                    RpcSessionCommand::Stop => {
                        debug!("RPC session stop requested");
                        break;
                    }
                }
            }

            Some(completion) = completions.recv() => {
                core.complete(completion);
            }

            now = worker.tick() => {
                core.tick(now);
            }
        }
    }

    core.stop();
    info!("RPC session for {} stopped", core.config().local_call);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::job::JobState;
    use crate::jobs::GetVersionJob;
    use crate::session::tests::CannedActions;
    use crate::session::{RpcSessionConfig, T_RPCACK};

    #[tokio::test(start_paused = true)]
    async fn test_actor_times_out_sent_job() {
        let (frame_tx, mut frames) = mpsc::unbounded_channel();
        let actions: Arc<CannedActions> = CannedActions::new();
        let (core, mut events) =
            RpcSessionCore::new(RpcSessionConfig::new("W1AW"), actions, frame_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_rpc_session(core, cmd_rx));
        let handle = RpcSessionHandle::new(cmd_tx);

        let seq = handle
            .submit(Box::new(GetVersionJob::new("KK7DS", "Version")))
            .await
            .unwrap();
        frames.recv().await.unwrap().mark_sent();

        tokio::time::sleep(Duration::from_secs(35)).await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.seq, seq);
        assert_eq!(event.state, JobState::Timeout);

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_acks_deferred_request() {
        let (frame_tx, mut frames) = mpsc::unbounded_channel();
        let actions = CannedActions::new();
        let (core, _events) =
            RpcSessionCore::new(RpcSessionConfig::new("W1AW"), actions.clone(), frame_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_rpc_session(core, cmd_rx));
        let handle = RpcSessionHandle::new(cmd_tx);

        let request = Frame::new("KK7DS", "W1AW", b"RPCCheckMail\x1d".to_vec()).with_seq(5);
        handle.incoming(request).await.unwrap();

        // Wait until the action has been run
        let completer = loop {
            if let Some(c) = actions.deferred.lock().unwrap().pop() {
                break c;
            }
            tokio::task::yield_now().await;
        };
        completer.complete(Default::default());

        let ack = frames.recv().await.unwrap();
        assert_eq!(ack.frame_type, T_RPCACK);
        assert_eq!(ack.seq, 5);

        handle.stop().await;
        task.await.unwrap();
        assert!(handle
            .submit(Box::new(GetVersionJob::new("KK7DS", "Version")))
            .await
            .is_err());
    }
}
