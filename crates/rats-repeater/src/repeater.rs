//! Frame forwarding engine
//!
//! Every attached transport gets a handler that routes its inbound frames
//! through [`Repeater`]. Routing decisions and all mutation of the path
//! list and station table happen under one lock; link sends are
//! non-blocking enqueues, so the lock is never held across I/O.
//!
//! # Routing
//!
//! 1. Frames to `!` are dropped.
//! 2. GPS beacons from an allowed port are copied raw to every GPS client.
//! 3. The source station is recorded against the arrival path.
//! 4. A destination heard recently on a live path gets a direct copy.
//!    Anything else is repeated on every path except the arrival path,
//!    dropping dead paths found along the way.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rats_protocol::{Frame, BROADCAST_CALL, SESSION_CHAT};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthPolicy;
use crate::config::RepeaterConfig;
use crate::error::RepeaterError;
use crate::link::{LinkOptions, StreamTransport};
use crate::listener::{GpsSink, Listeners};
use crate::station::{Sighting, StationTable};
use crate::transport::Transport;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

/// Snapshot of one tracked station
#[derive(Debug, Clone, PartialEq)]
pub struct StationStatus {
    /// Station callsign
    pub call: String,
    /// Time since it was last heard
    pub last_heard: Duration,
    /// Name of its last path, if that path still exists
    pub path: Option<String>,
}

struct RouteState {
    paths: Vec<Arc<dyn Transport>>,
    calls: StationTable,
    gps_sinks: Vec<GpsSink>,
}

impl RouteState {
    fn repeat(
        &mut self,
        config: &RepeaterConfig,
        arrival: &Arc<dyn Transport>,
        frame: Frame,
    ) -> Result<(), RepeaterError> {
        if frame.is_noop() {
            return Ok(());
        }

        if frame.is_gps_beacon() && config.gps_allowed(arrival.name()) {
            self.fan_out_gps(&frame.data);
        }

        if frame.s_station != BROADCAST_CALL {
            match self.calls.record_sighting(&frame.s_station, arrival) {
                Sighting::New => info!(
                    "Adding new station {} to port {}",
                    frame.s_station,
                    arrival.name()
                ),
                Sighting::Moved { .. } => info!(
                    "Station {} moved to port {}",
                    frame.s_station,
                    arrival.name()
                ),
                Sighting::Same | Sighting::Untracked => {}
            }
        }

        if let Some(dst) = self.calls.lookup(&frame.d_station) {
            match dst.last_transport().filter(|t| t.is_enabled()) {
                None => info!("Last transport for {} is dead", frame.d_station),
                Some(path) if dst.last_heard() < config.call_timeout() => {
                    debug!("Delivering frame to {} at {}", frame.d_station, path.name());
                    return path.send_frame(frame.fresh_copy());
                }
                Some(_) => info!(
                    "Last port for {} was {} sec ago (>{} sec)",
                    frame.d_station,
                    dst.last_heard().as_secs(),
                    config.call_timeout_secs
                ),
            }
        }

        debug!("Repeating frame to {} on all ports", frame.d_station);
        let arrival_id = arrival.id();
        self.paths.retain(|path| {
            if path.id() == arrival_id {
                return true;
            }
            if !path.is_enabled() {
                info!("Found a stale path {}, removing", path.name());
                path.disable();
                return false;
            }
            if let Err(e) = path.send_frame(frame.fresh_copy()) {
                warn!("Failed to repeat to {}: {}", path.name(), e);
            }
            true
        });
        Ok(())
    }

    fn fan_out_gps(&mut self, data: &[u8]) {
        self.gps_sinks
            .retain(|sink| match sink.tx.try_send(data.to_vec()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("GPS client {} is not keeping up, dropping sentence", sink.peer);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    info!("GPS client {} disconnected", sink.peer);
                    false
                }
            });
    }
}

struct Shared {
    id: String,
    config: RepeaterConfig,
    auth: AuthPolicy,
    state: Mutex<RouteState>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, RouteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, arrival: &Arc<dyn Transport>, frame: Frame) {
        let mut state = self.lock_state();
        if let Err(e) = state.repeat(&self.config, arrival, frame) {
            warn!("Exception during routing from {}: {}", arrival.name(), e);
        }
    }

    fn attach(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        info!("Attaching path {}", transport.name());
        self.lock_state().paths.push(transport.clone());

        let shared = Arc::downgrade(self);
        let path = Arc::downgrade(&transport);
        transport.set_inhandler(Some(Arc::new(move |frame: Frame| {
            if let (Some(shared), Some(path)) = (shared.upgrade(), path.upgrade()) {
                shared.route(&path, frame);
            }
        })));
    }

    fn accept_new(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        info!("Accepted new client {}", peer);
        let options = LinkOptions::new(peer.to_string())
            .authenticate(self.auth.clone(), peer.ip())
            .auth_timeout(self.config.auth_timeout());
        self.attach(StreamTransport::spawn(stream, options));
    }

    fn accept_new_gps(&self, stream: TcpStream, peer: SocketAddr) {
        info!("Accepted new GPS client {}", peer);
        self.lock_state().gps_sinks.push(GpsSink::spawn(stream, peer));
    }
}

/// The repeater: a set of paths, the station table and the accept loop
pub struct Repeater {
    shared: Arc<Shared>,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Repeater {
    /// Create a repeater identified as `id`
    pub fn new(id: impl Into<String>, config: RepeaterConfig) -> Self {
        let auth = AuthPolicy {
            reqauth: config.reqauth,
            trustlocal: config.trustlocal,
            users_file: config.users_file.clone(),
        };
        let state = RouteState {
            paths: Vec::new(),
            calls: StationTable::new(config.eviction_policy()),
            gps_sinks: Vec::new(),
        };
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                config,
                auth,
                state: Mutex::new(state),
            }),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            accept_task: Mutex::new(None),
        }
    }

    /// Repeater identifier
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Policy in effect
    pub fn config(&self) -> &RepeaterConfig {
        &self.shared.config
    }

    /// Attach a path and route its inbound frames through this repeater
    pub fn add_new_transport(&self, transport: Arc<dyn Transport>) {
        self.shared.attach(transport);
    }

    /// Start accepting network and GPS clients
    ///
    /// Must be called from within a tokio runtime.
    pub fn repeat(&self, listeners: Listeners) -> Result<(), RepeaterError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RepeaterError::Stopped);
        }
        let mut task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Err(RepeaterError::AlreadyRunning);
        }

        let shared = self.shared.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        *task = Some(tokio::spawn(accept_loop(shared, listeners, shutdown_rx)));
        Ok(())
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the accept loop, wait for it, and disable every path
    ///
    /// A stopped repeater cannot be restarted; calling this again is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            info!("Stopping repeater");
            if let Err(e) = task.await {
                warn!("Accept loop ended abnormally: {}", e);
            }
        }

        let mut state = self.shared.lock_state();
        for path in state.paths.drain(..) {
            debug!("Stopping path {}", path.name());
            path.disable();
        }
        state.gps_sinks.clear();
    }

    /// Broadcast an identification frame on every live path
    pub fn announce(&self, text: &str) {
        let frame =
            Frame::new(self.shared.id.clone(), BROADCAST_CALL, text.as_bytes().to_vec())
                .with_session(SESSION_CHAT);
        let state = self.shared.lock_state();
        for path in state.paths.iter().filter(|p| p.is_enabled()) {
            if let Err(e) = path.send_frame(frame.fresh_copy()) {
                warn!("Failed to send ID on {}: {}", path.name(), e);
            }
        }
    }

    /// Names of the attached paths, in attach order
    pub fn paths(&self) -> Vec<String> {
        self.shared
            .lock_state()
            .paths
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Snapshot of the station table, most recently heard first
    pub fn stations(&self) -> Vec<StationStatus> {
        let state = self.shared.lock_state();
        let mut stations: Vec<_> = state
            .calls
            .iter()
            .map(|info| StationStatus {
                call: info.call().to_string(),
                last_heard: info.last_heard(),
                path: info.last_transport().map(|t| t.name().to_string()),
            })
            .collect();
        stations.sort_by_key(|s| s.last_heard);
        stations
    }

    /// Number of connected GPS clients
    pub fn gps_clients(&self) -> usize {
        self.shared.lock_state().gps_sinks.len()
    }
}

async fn accept_on(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn accept_loop(
    shared: Arc<Shared>,
    listeners: Listeners,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,

            result = accept_on(listeners.data.as_ref()) => match result {
                Ok((stream, peer)) => shared.accept_new(stream, peer),
                Err(e) => {
                    warn!("Failed to accept client: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },

            result = accept_on(listeners.gps.as_ref()) => match result {
                Ok((stream, peer)) => shared.accept_new_gps(stream, peer),
                Err(e) => {
                    warn!("Failed to accept GPS client: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    info!("Repeater accept loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::tests::MockTransport;

    fn attach(repeater: &Repeater, name: &str) -> Arc<MockTransport> {
        let mock = MockTransport::new(name);
        repeater.add_new_transport(mock.clone());
        mock
    }

    fn frame(src: &str, dst: &str) -> Frame {
        Frame::new(src, dst, b"hello".to_vec())
    }

    fn add_gps_sink(repeater: &Repeater) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(4);
        repeater.shared.lock_state().gps_sinks.push(GpsSink {
            peer: "127.0.0.1:1".parse().unwrap(),
            tx,
        });
        rx
    }

    #[test]
    fn test_noop_destination_dropped() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        let b = attach(&repeater, "B");

        a.inject(frame("X", "!"));
        assert!(b.take_sent().is_empty());
        assert!(repeater.stations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unicast_to_fresh_station_then_broadcast_when_stale() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        let b = attach(&repeater, "B");
        let c = attach(&repeater, "C");

        a.inject(frame("X", "Y"));
        // Unknown destination: everyone but the arrival path
        assert!(a.take_sent().is_empty());
        assert_eq!(b.take_sent().len(), 1);
        assert_eq!(c.take_sent().len(), 1);

        b.inject(frame("Z", "X"));
        let sent = a.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].d_station, "X");
        assert!(c.take_sent().is_empty());

        tokio::time::advance(Duration::from_secs(601)).await;
        b.inject(frame("Z", "X"));
        assert_eq!(a.take_sent().len(), 1);
        assert_eq!(c.take_sent().len(), 1);
        assert!(b.take_sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_destination_path_falls_back_and_is_pruned() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        let b = attach(&repeater, "B");
        let c = attach(&repeater, "C");

        a.inject(frame("X", "CQCQCQ"));
        b.take_sent();
        c.take_sent();

        a.disable();
        b.inject(frame("Z", "X"));
        assert_eq!(c.take_sent().len(), 1);
        assert!(a.take_sent().is_empty());
        assert_eq!(repeater.paths(), vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_broadcast_source_not_tracked() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        let _b = attach(&repeater, "B");

        a.inject(frame(BROADCAST_CALL, BROADCAST_CALL));
        assert!(repeater.stations().is_empty());
    }

    #[test]
    fn test_zero_capacity_table_still_broadcasts() {
        let config = RepeaterConfig {
            max_stations: Some(0),
            ..Default::default()
        };
        let repeater = Repeater::new("TEST", config);
        let a = attach(&repeater, "A");
        let b = attach(&repeater, "B");

        a.inject(frame("X", "CQCQCQ"));
        b.inject(frame("Z", "X"));
        assert!(repeater.stations().is_empty());
        // X was never recorded, so the reply is repeated everywhere
        assert_eq!(b.take_sent().len(), 1);
        assert_eq!(a.take_sent().len(), 1);
    }

    #[test]
    fn test_station_move_updates_path() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        let b = attach(&repeater, "B");

        a.inject(frame("X", "CQCQCQ"));
        b.inject(frame("X", "CQCQCQ"));

        let stations = repeater.stations();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].call, "X");
        assert_eq!(stations[0].path.as_deref(), Some("B"));
    }

    #[test]
    fn test_gps_beacon_fans_out() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        let b = attach(&repeater, "B");
        let mut gps = add_gps_sink(&repeater);

        let beacon = Frame::new(BROADCAST_CALL, BROADCAST_CALL, b"$GPGGA,1".to_vec())
            .with_session(SESSION_CHAT);
        a.inject(beacon);

        assert_eq!(gps.try_recv().unwrap(), b"$GPGGA,1");
        // Still repeated as a normal broadcast
        assert_eq!(b.take_sent().len(), 1);
    }

    #[test]
    fn test_gps_beacon_respects_allow_list() {
        let config = RepeaterConfig {
            gps_okay_ports: vec!["B".into()],
            ..Default::default()
        };
        let repeater = Repeater::new("TEST", config);
        let a = attach(&repeater, "A");
        let b = attach(&repeater, "B");
        let mut gps = add_gps_sink(&repeater);

        let beacon = || {
            Frame::new(BROADCAST_CALL, BROADCAST_CALL, b"$GPRMC".to_vec())
                .with_session(SESSION_CHAT)
        };
        a.inject(beacon());
        assert!(gps.try_recv().is_err());

        b.inject(beacon());
        assert_eq!(gps.try_recv().unwrap(), b"$GPRMC");
    }

    #[test]
    fn test_closed_gps_sink_removed() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        drop(add_gps_sink(&repeater));
        assert_eq!(repeater.gps_clients(), 1);

        a.inject(
            Frame::new(BROADCAST_CALL, BROADCAST_CALL, b"$GP".to_vec()).with_session(SESSION_CHAT),
        );
        assert_eq!(repeater.gps_clients(), 0);
    }

    #[test]
    fn test_announce_uses_repeater_id() {
        let repeater = Repeater::new("W1AW", RepeaterConfig::default());
        let a = attach(&repeater, "A");

        repeater.announce("W1AW repeater");
        let sent = a.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].s_station, "W1AW");
        assert_eq!(sent[0].d_station, BROADCAST_CALL);
        assert_eq!(sent[0].data, b"W1AW repeater");
    }

    #[tokio::test]
    async fn test_stop_disables_paths_and_is_final() {
        let repeater = Repeater::new("TEST", RepeaterConfig::default());
        let a = attach(&repeater, "A");
        repeater.repeat(Listeners::default()).unwrap();
        assert!(matches!(
            repeater.repeat(Listeners::default()),
            Err(RepeaterError::AlreadyRunning)
        ));

        repeater.stop().await;
        assert!(!a.is_enabled());
        assert!(repeater.paths().is_empty());
        assert!(matches!(
            repeater.repeat(Listeners::default()),
            Err(RepeaterError::Stopped)
        ));

        // Second stop is harmless
        repeater.stop().await;
    }
}
