//! RPC session state machine
//!
//! [`RpcSessionCore`] turns submitted jobs into request frames, executes
//! requests that arrive from other stations, and matches acks back to the
//! pending job by sequence number. It does no I/O of its own: frames leave
//! through a [`FrameOutlet`] and state changes are reported as [`JobEvent`]s
//! on a channel with a single consumer.
//!
//! Time only advances through [`RpcSessionCore::tick`], which the actor in
//! [`crate::actor`] calls once per tick period.

use std::collections::HashMap;
use std::sync::Arc;

use rats_protocol::rpc_dict::ASCII_GS;
use rats_protocol::{DictCodec, Frame, RpcDict, SentMarker, SeparatorCodec};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::actions::RpcActions;
use crate::error::RpcError;
use crate::job::{Completion, JobCompleter, JobState, RpcJob};
use crate::registry::JobRegistry;

/// Session type id for RPC traffic
pub const T_RPC: u8 = 7;

/// Frame type of a request
pub const T_RPCREQ: u8 = 0;

/// Frame type of an acknowledgement
pub const T_RPCACK: u8 = 1;

/// Default seconds before an unanswered job times out
pub const DEFAULT_T_RETRY_SECS: u64 = 30;

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSessionConfig {
    /// Callsign put in the source field of outgoing frames
    pub local_call: String,
    /// Session id stamped on outgoing frames
    pub session_id: u8,
    /// Seconds after transmission before a job times out
    pub t_retry_secs: u64,
    /// Worker period in milliseconds
    pub tick_ms: u64,
}

impl Default for RpcSessionConfig {
    fn default() -> Self {
        Self {
            local_call: String::new(),
            session_id: T_RPC,
            t_retry_secs: DEFAULT_T_RETRY_SECS,
            tick_ms: 1000,
        }
    }
}

impl RpcSessionConfig {
    /// Config for `local_call` with default timings
    pub fn new(local_call: impl Into<String>) -> Self {
        Self {
            local_call: local_call.into(),
            ..Default::default()
        }
    }

    /// Retry window
    pub fn t_retry(&self) -> Duration {
        Duration::from_secs(self.t_retry_secs)
    }

    /// Worker period
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Where outgoing frames go
pub trait FrameOutlet: Send {
    /// Queue `frame` for transmission
    fn outgoing(&self, frame: Frame) -> Result<(), RpcError>;
}

impl FrameOutlet for mpsc::UnboundedSender<Frame> {
    fn outgoing(&self, frame: Frame) -> Result<(), RpcError> {
        self.send(frame).map_err(|_| RpcError::OutletClosed)
    }
}

impl FrameOutlet for mpsc::Sender<Frame> {
    fn outgoing(&self, frame: Frame) -> Result<(), RpcError> {
        self.try_send(frame).map_err(|_| RpcError::OutletClosed)
    }
}

/// A job reached a terminal state
#[derive(Debug)]
pub struct JobEvent {
    /// Sequence number the job was sent with
    pub seq: u16,
    /// The job itself, handed back to the submitter
    pub job: Box<dyn RpcJob>,
    /// `Complete` or `Timeout`
    pub state: JobState,
    /// Remote result (empty on timeout)
    pub result: RpcDict,
}

#[derive(Debug)]
struct PendingJob {
    stamp: Instant,
    job: Box<dyn RpcJob>,
    marker: SentMarker,
}

/// A remote request whose answer will arrive through a completer
#[derive(Debug, Clone)]
struct DeferredRequest {
    station: String,
    seq: u16,
    since: Instant,
}

/// The RPC request/ack state machine
pub struct RpcSessionCore {
    config: RpcSessionConfig,
    registry: JobRegistry,
    codec: Box<dyn DictCodec>,
    actions: Arc<dyn RpcActions>,
    outlet: Box<dyn FrameOutlet>,
    events: mpsc::UnboundedSender<JobEvent>,
    pending: HashMap<u16, PendingJob>,
    jobc: u16,
    deferred: HashMap<u64, DeferredRequest>,
    next_token: u64,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: Option<mpsc::UnboundedReceiver<Completion>>,
    enabled: bool,
}

impl RpcSessionCore {
    /// Create a session; returns it with the receiving end of its job events
    pub fn new(
        config: RpcSessionConfig,
        actions: Arc<dyn RpcActions>,
        outlet: impl FrameOutlet + 'static,
    ) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let core = Self {
            config,
            registry: JobRegistry::standard(),
            codec: Box::new(SeparatorCodec),
            actions,
            outlet: Box::new(outlet),
            events,
            pending: HashMap::new(),
            jobc: 0,
            deferred: HashMap::new(),
            next_token: 1,
            completion_tx,
            completion_rx: Some(completion_rx),
            enabled: true,
        };
        (core, events_rx)
    }

    /// Replace the job registry
    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the dictionary codec
    pub fn with_codec(mut self, codec: impl DictCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Session settings
    pub fn config(&self) -> &RpcSessionConfig {
        &self.config
    }

    /// Whether the session still processes traffic
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of jobs awaiting an ack
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `seq` belongs to a pending job
    pub fn is_pending(&self, seq: u16) -> bool {
        self.pending.contains_key(&seq)
    }

    /// Number of remote requests still waiting on a completer
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Take the completion receiver so an event loop can wait on it
    ///
    /// Once taken, [`drain_completions`](Self::drain_completions) does nothing.
    pub fn take_completion_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Completion>> {
        self.completion_rx.take()
    }

    fn next_seq(&mut self) -> Result<u16, RpcError> {
        for _ in 0..u16::MAX {
            self.jobc = self.jobc.wrapping_add(1);
            if self.jobc != 0 && !self.pending.contains_key(&self.jobc) {
                return Ok(self.jobc);
            }
        }
        Err(RpcError::SequenceExhausted)
    }

    fn frame_to(&self, dest: &str, frame_type: u8, seq: u16, data: Vec<u8>) -> Frame {
        Frame::new(self.config.local_call.as_str(), dest, data)
            .with_session(self.config.session_id)
            .with_type(frame_type)
            .with_seq(seq)
    }

    fn encode_call(&self, job: &dyn RpcJob) -> Result<Vec<u8>, RpcError> {
        let mut data = job.tag().as_bytes().to_vec();
        data.push(ASCII_GS);
        data.extend(job.pack(self.codec.as_ref())?);
        Ok(data)
    }

    fn decode_call(&self, frame: &Frame) -> Result<Box<dyn RpcJob>, RpcError> {
        let split = frame
            .data
            .iter()
            .position(|&b| b == ASCII_GS)
            .ok_or_else(|| RpcError::MalformedCall(frame.s_station.clone()))?;
        let (tag, args) = (&frame.data[..split], &frame.data[split + 1..]);
        let tag = std::str::from_utf8(tag)
            .map_err(|_| RpcError::UnknownCall(String::from_utf8_lossy(tag).into_owned()))?;

        let mut job = self.registry.create(tag, &frame.s_station)?;
        job.unpack(args, self.codec.as_ref())?;
        Ok(job)
    }

    /// Send `job` and track it until it completes or times out
    pub fn submit(&mut self, job: Box<dyn RpcJob>) -> Result<u16, RpcError> {
        if !self.enabled {
            return Err(RpcError::SessionStopped);
        }

        let seq = self.next_seq()?;
        let data = self.encode_call(job.as_ref())?;
        let frame = self.frame_to(job.dest(), T_RPCREQ, seq, data);
        let marker = frame.sent_marker();

        info!("Sending job `{}' to {}", job.desc(), job.dest());
        self.outlet.outgoing(frame)?;
        debug!("Job {} sent", seq);

        self.pending.insert(
            seq,
            PendingJob {
                stamp: Instant::now(),
                job,
                marker,
            },
        );
        Ok(seq)
    }

    /// Handle a frame addressed to this session
    pub fn incoming(&mut self, frame: Frame) {
        if !self.enabled {
            debug!("Session stopped, ignoring frame from {}", frame.s_station);
            return;
        }

        match frame.frame_type {
            T_RPCREQ => match self.decode_call(&frame) {
                Ok(job) => self.execute(job, frame.seq),
                Err(e) => warn!("Unable to execute RPC from {}: {}", frame.s_station, e),
            },
            T_RPCACK => self.acknowledge(frame),
            other => warn!("Unknown RPC frame type {}", other),
        }
    }

    fn execute(&mut self, job: Box<dyn RpcJob>, seq: u16) {
        let token = self.next_token;
        self.next_token += 1;

        debug!("Running {} for {} (seq {})", job.tag(), job.dest(), seq);
        let completer = JobCompleter::new(token, self.completion_tx.clone());
        match job.do_action(self.actions.as_ref(), completer) {
            Some(result) => self.send_ack(job.dest(), seq, &result),
            None => {
                debug!("Job {} from {} will complete later", seq, job.dest());
                self.deferred.insert(
                    token,
                    DeferredRequest {
                        station: job.dest().to_string(),
                        seq,
                        since: Instant::now(),
                    },
                );
            }
        }
    }

    fn send_ack(&self, station: &str, seq: u16, result: &RpcDict) {
        debug!("Job state: complete for {}: {:?}", seq, result);
        let data = match self.codec.encode(result) {
            Ok(data) => data,
            Err(e) => {
                warn!("Unable to encode result for job {}: {}", seq, e);
                return;
            }
        };
        let frame = self.frame_to(station, T_RPCACK, seq, data);
        if let Err(e) = self.outlet.outgoing(frame) {
            warn!("Unable to send ack for job {} to {}: {}", seq, station, e);
        }
    }

    fn acknowledge(&mut self, frame: Frame) {
        let Some(pending) = self.pending.remove(&frame.seq) else {
            info!("Unknown job {}", frame.seq);
            return;
        };

        match self.codec.decode(&frame.data) {
            Ok(result) => self.emit(frame.seq, pending.job, JobState::Complete, result),
            Err(e) => {
                warn!(
                    "Malformed result for job {} from {}: {}",
                    frame.seq, frame.s_station, e
                );
                self.emit(frame.seq, pending.job, JobState::Timeout, RpcDict::new());
            }
        }
    }

    /// Answer a deferred remote request
    ///
    /// A token that already completed is ignored.
    pub fn complete(&mut self, completion: Completion) {
        if !self.enabled {
            return;
        }
        match self.deferred.remove(&completion.token) {
            Some(request) => self.send_ack(&request.station, request.seq, &completion.result),
            None => debug!("Ignoring completion for finished job {}", completion.token),
        }
    }

    /// Answer every deferred request whose completer has fired
    pub fn drain_completions(&mut self) {
        let mut ready = Vec::new();
        if let Some(rx) = self.completion_rx.as_mut() {
            while let Ok(completion) = rx.try_recv() {
                ready.push(completion);
            }
        }
        for completion in ready {
            self.complete(completion);
        }
    }

    /// Run the periodic worker at time `now`
    ///
    /// Jobs whose frame has not been transmitted yet get their timer
    /// rearmed; transmitted jobs older than the retry window time out.
    /// Deferred remote requests unanswered for a retry window are dropped,
    /// since the requester has given up on them by then.
    pub fn tick(&mut self, now: Instant) {
        if !self.enabled {
            return;
        }

        let t_retry = self.config.t_retry();
        self.deferred.retain(|token, request| {
            let live = now.saturating_duration_since(request.since) <= t_retry;
            if !live {
                info!(
                    "Giving up on job {} for {} (token {})",
                    request.seq, request.station, token
                );
            }
            live
        });

        let mut expired = Vec::new();
        for (&seq, pending) in self.pending.iter_mut() {
            if !pending.marker.is_set() {
                pending.stamp = now;
            } else if now.saturating_duration_since(pending.stamp) > t_retry {
                expired.push(seq);
            }
        }

        expired.sort_unstable();
        for seq in expired {
            if let Some(pending) = self.pending.remove(&seq) {
                info!("Cancelling job {} due to timeout", seq);
                self.emit(seq, pending.job, JobState::Timeout, RpcDict::new());
            }
        }
    }

    /// Stop processing; pending jobs are abandoned without events
    pub fn stop(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        if !self.pending.is_empty() {
            info!("Abandoning {} pending jobs", self.pending.len());
        }
        self.pending.clear();
        self.deferred.clear();
    }

    fn emit(&self, seq: u16, job: Box<dyn RpcJob>, state: JobState, result: RpcDict) {
        debug!("Job state: {} for {}", state, seq);
        let event = JobEvent {
            seq,
            job,
            state,
            result,
        };
        if self.events.send(event).is_err() {
            debug!("No listener for job {} reaching {}", seq, state);
        }
    }
}
