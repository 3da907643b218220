//! Async stream transport
//!
//! A [`StreamTransport`] wraps any byte stream (TCP socket, serial port,
//! `tokio::io::duplex` in tests) in a spawned task that:
//!
//! - optionally runs the USER/PASS gate before framing starts, giving up on
//!   timeout or shutdown
//! - scans incoming bytes for DDT2 blocks and hands frames to the handler
//! - drains the outgoing queue, preceding idle-link transmissions with a
//!   warm-up frame, and marks each frame as sent once written
//!
//! `send_frame` only enqueues, so callers never wait on the link. Until the
//! gate has passed the link is enabled but not ready, and frames sent to it
//! are dropped.

use std::io::ErrorKind;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rats_protocol::{ddt2, BlockScanner, Frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{auth_user, AuthPolicy};
use crate::error::RepeaterError;
use crate::transport::{FrameHandler, Transport, TransportId};

/// Default outgoing queue depth per link
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Length of the warm-up payload
pub const DEFAULT_WARMUP_LENGTH: usize = 8;

/// Default time allowed for the USER/PASS exchange
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// How a link is run
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Name reported by [`Transport::name`]
    pub name: String,
    /// Idle time after which a warm-up frame precedes the next send (zero disables)
    pub warmup_timeout: Duration,
    /// Warm-up payload length
    pub warmup_length: usize,
    /// Outgoing queue depth
    pub queue_depth: usize,
    /// Authenticate the peer before framing starts
    pub auth: Option<(AuthPolicy, IpAddr)>,
    /// Time allowed for authentication
    pub auth_timeout: Duration,
}

impl LinkOptions {
    /// Options for a link with no warm-up and no auth gate
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            warmup_timeout: Duration::ZERO,
            warmup_length: DEFAULT_WARMUP_LENGTH,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            auth: None,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Set the warm-up timeout
    pub fn warmup(mut self, timeout: Duration) -> Self {
        self.warmup_timeout = timeout;
        self
    }

    /// Gate the link behind the USER/PASS exchange
    pub fn authenticate(mut self, policy: AuthPolicy, peer: IpAddr) -> Self {
        self.auth = Some((policy, peer));
        self
    }

    /// Set the authentication timeout
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }
}

/// State shared between the handle and the link task
struct LinkShared {
    enabled: AtomicBool,
    ready: AtomicBool,
    inhandler: Mutex<Option<FrameHandler>>,
}

impl LinkShared {
    fn handler(&self) -> Option<FrameHandler> {
        self.inhandler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Transport over an async byte stream
pub struct StreamTransport {
    id: TransportId,
    name: String,
    shared: Arc<LinkShared>,
    out_tx: mpsc::Sender<Frame>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamTransport {
    /// Spawn the link task for `io` and return its handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T>(io: T, options: LinkOptions) -> Arc<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(options.queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(LinkShared {
            enabled: AtomicBool::new(true),
            ready: AtomicBool::new(options.auth.is_none()),
            inhandler: Mutex::new(None),
        });

        let transport = Arc::new(Self {
            id: TransportId::next(),
            name: options.name.clone(),
            shared: shared.clone(),
            out_tx,
            shutdown_tx,
        });

        let task = LinkTask {
            name: options.name.clone(),
            shared,
            out_rx,
            shutdown_rx,
            scanner: BlockScanner::new(),
            last_xmit: None,
            options,
        };
        tokio::spawn(task.run(io));

        transport
    }

    /// Whether the link has passed its auth gate (always true without one)
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }
}

impl Transport for StreamTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    fn disable(&self) {
        if self.shared.enabled.swap(false, Ordering::AcqRel) {
            debug!("Disabling link {}", self.name);
        }
        *self
            .shared
            .inhandler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        let _ = self.shutdown_tx.send(true);
    }

    fn send_frame(&self, frame: Frame) -> Result<(), RepeaterError> {
        if !self.is_enabled() {
            warn!("Refusing to queue block for dead transport {}", self.name);
            return Err(RepeaterError::LinkDisabled(self.name.clone()));
        }
        if !self.is_ready() {
            debug!("Link {} not authenticated yet, dropping {}", self.name, frame);
            return Ok(());
        }
        self.out_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RepeaterError::QueueFull(self.name.clone()),
            mpsc::error::TrySendError::Closed(_) => RepeaterError::LinkDisabled(self.name.clone()),
        })
    }

    fn set_inhandler(&self, handler: Option<FrameHandler>) {
        *self
            .shared
            .inhandler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

struct LinkTask {
    name: String,
    shared: Arc<LinkShared>,
    out_rx: mpsc::Receiver<Frame>,
    shutdown_rx: watch::Receiver<bool>,
    scanner: BlockScanner,
    last_xmit: Option<Instant>,
    options: LinkOptions,
}

impl LinkTask {
    async fn run<T>(mut self, io: T)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(io);
        let mut reader = BufReader::new(reader);

        if let Some((policy, peer)) = self.options.auth.take() {
            let exchange = auth_user(&mut reader, &mut writer, peer, &policy);
            let deadline = self.options.auth_timeout;
            let outcome = tokio::select! {
                _ = self.shutdown_rx.changed() => None,
                result = tokio::time::timeout(deadline, exchange) => Some(result),
            };
            match outcome {
                Some(Ok(Ok(true))) => self.shared.ready.store(true, Ordering::Release),
                Some(Ok(Ok(false))) => {
                    info!("Authentication failed on {}", self.name);
                    self.finish();
                    return;
                }
                Some(Ok(Err(e))) => {
                    warn!("I/O error during authentication on {}: {}", self.name, e);
                    self.finish();
                    return;
                }
                Some(Err(_)) => {
                    info!("Authentication timed out on {}", self.name);
                    self.finish();
                    return;
                }
                None => {
                    debug!("Shutdown requested for {} during authentication", self.name);
                    self.finish();
                    return;
                }
            }
        }

        info!("Starting link {}", self.name);
        let mut buffer = vec![0u8; 1024];

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    debug!("Shutdown requested for {}", self.name);
                    break;
                }

                frame = self.out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = self.transmit(&mut writer, frame).await {
                        warn!("Exception while sending frames on {}: {}", self.name, e);
                        break;
                    }
                }

                result = reader.read(&mut buffer) => {
                    match result {
                        Ok(0) => {
                            debug!("Link {} closed by peer", self.name);
                            break;
                        }
                        Ok(n) => {
                            self.scanner.push_bytes(&buffer[..n]);
                            self.dispatch_frames();
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                        Err(e) => {
                            warn!("Read error on {}: {}", self.name, e);
                            break;
                        }
                    }
                }
            }
        }

        self.finish();
    }

    fn dispatch_frames(&mut self) {
        while let Some(result) = self.scanner.next_frame() {
            match result {
                Ok(frame) => {
                    debug!("Got a block on {}: {}", self.name, frame);
                    match self.shared.handler() {
                        Some(handler) => handler(frame),
                        None => debug!("No handler on {}, dropping {}", self.name, frame),
                    }
                }
                Err(e) => warn!("Found a broken block on {}: {}", self.name, e),
            }
        }
    }

    async fn transmit<W>(&mut self, writer: &mut W, frame: Frame) -> Result<(), RepeaterError>
    where
        W: AsyncWrite + Unpin,
    {
        let warmup = self.options.warmup_timeout;
        let idle = self.last_xmit.is_none_or(|t| t.elapsed() > warmup);
        if !warmup.is_zero() && idle {
            let warm = ddt2::warmup_frame(self.options.warmup_length);
            debug!("Sending warm-up on {}: {}", self.name, warm);
            writer.write_all(&ddt2::encode_block(&warm)?).await?;
        }

        debug!("Sending block on {}: {}", self.name, frame);
        writer.write_all(&ddt2::encode_block(&frame)?).await?;
        writer.flush().await?;
        frame.mark_sent();
        self.last_xmit = Some(Instant::now());
        Ok(())
    }

    fn finish(&mut self) {
        self.shared.enabled.store(false, Ordering::Release);
        *self
            .shared
            .inhandler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        let leftover = self.scanner.take_unconverted();
        if !leftover.is_empty() {
            debug!("Unconverted data on {}: {} bytes", self.name, leftover.len());
        }
        info!("Link {} ended", self.name);
    }
}
