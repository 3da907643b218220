//! Per-station last-heard tracking
//!
//! Each callsign the repeater hears gets a [`CallInfo`] recording when it
//! was last heard and on which link. Ages are computed at query time from
//! the stored timestamp; nothing counts down in the background.
//!
//! Entries hold a weak reference to their link: the table never keeps a
//! dropped link alive, and a link that is gone reads as dead.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::transport::{Transport, TransportId};

/// What a sighting did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// First time this callsign was heard
    New,
    /// Heard again on the same link
    Same,
    /// Heard on a different link than last time
    Moved {
        /// The link it was last heard on
        from: TransportId,
    },
    /// Not recorded; the table is capped at zero entries
    Untracked,
}

/// How the table bounds its size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Keep every station for the life of the table
    #[default]
    Unbounded,
    /// Keep at most this many stations, dropping the least recently heard
    MaxEntries(usize),
}

/// Last-heard record for one callsign
#[derive(Clone)]
pub struct CallInfo {
    call: String,
    heard_at: Instant,
    transport_id: TransportId,
    transport: Weak<dyn Transport>,
}

impl CallInfo {
    fn new(call: &str, transport: &Arc<dyn Transport>) -> Self {
        Self {
            call: call.to_string(),
            heard_at: Instant::now(),
            transport_id: transport.id(),
            transport: Arc::downgrade(transport),
        }
    }

    /// Station callsign
    pub fn call(&self) -> &str {
        &self.call
    }

    /// Refresh the timestamp and remember the link
    pub fn just_heard(&mut self, transport: &Arc<dyn Transport>) {
        self.heard_at = Instant::now();
        self.transport_id = transport.id();
        self.transport = Arc::downgrade(transport);
    }

    /// Time since the station was last heard
    pub fn last_heard(&self) -> Duration {
        Instant::now().saturating_duration_since(self.heard_at)
    }

    /// Id of the link the station was last heard on
    pub fn last_transport_id(&self) -> TransportId {
        self.transport_id
    }

    /// The link the station was last heard on, if it still exists
    pub fn last_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.upgrade()
    }

    /// Whether the last link exists and is enabled
    pub fn last_transport_alive(&self) -> bool {
        self.last_transport().is_some_and(|t| t.is_enabled())
    }
}

impl std::fmt::Debug for CallInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInfo")
            .field("call", &self.call)
            .field("last_heard", &self.last_heard())
            .field("transport", &self.transport_id)
            .finish()
    }
}

/// Callsign to [`CallInfo`] map
#[derive(Debug, Default)]
pub struct StationTable {
    calls: HashMap<String, CallInfo>,
    policy: EvictionPolicy,
}

impl StationTable {
    /// Create an empty table
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            calls: HashMap::new(),
            policy,
        }
    }

    /// Record that `call` was heard on `transport`
    pub fn record_sighting(&mut self, call: &str, transport: &Arc<dyn Transport>) -> Sighting {
        if let Some(info) = self.calls.get_mut(call) {
            let previous = info.transport_id;
            info.just_heard(transport);
            return if previous == transport.id() {
                Sighting::Same
            } else {
                Sighting::Moved { from: previous }
            };
        }

        if let EvictionPolicy::MaxEntries(max) = self.policy {
            if max == 0 {
                return Sighting::Untracked;
            }
            while self.calls.len() >= max {
                self.evict_oldest();
            }
        }
        self.calls
            .insert(call.to_string(), CallInfo::new(call, transport));
        Sighting::New
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .calls
            .values()
            .min_by_key(|info| info.heard_at)
            .map(|info| info.call.clone());
        if let Some(call) = oldest {
            debug!("Evicting station {}", call);
            self.calls.remove(&call);
        }
    }

    /// Look up a station
    pub fn lookup(&self, call: &str) -> Option<&CallInfo> {
        self.calls.get(call)
    }

    /// Seconds since `call` was last heard, if known
    pub fn last_heard_seconds(&self, call: &str) -> Option<f64> {
        self.lookup(call).map(|info| info.last_heard().as_secs_f64())
    }

    /// Iterate over all known stations
    pub fn iter(&self) -> impl Iterator<Item = &CallInfo> {
        self.calls.values()
    }

    /// Number of known stations
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no station has been heard
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
