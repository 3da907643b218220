//! Repeater policy configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::station::EvictionPolicy;

/// Default station freshness window (seconds)
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 600;

/// Default TCP port for framed data clients
pub const DEFAULT_NET_PORT: u16 = 9000;

/// Default seconds a network client has to finish the USER/PASS exchange
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 60;

/// Default TCP port for raw GPS consumers
pub const DEFAULT_GPS_PORT: u16 = 9500;

/// Policy for a [`Repeater`](crate::Repeater)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterConfig {
    /// Require USER/PASS from network clients
    pub reqauth: bool,
    /// Skip authentication for loopback clients
    pub trustlocal: bool,
    /// Transport names allowed to re-broadcast GPS beacons (empty = all)
    pub gps_okay_ports: Vec<String>,
    /// Seconds a station's last path stays eligible for direct delivery
    pub call_timeout_secs: u64,
    /// `USERNAME PASSWORD` file consulted when authentication is required
    pub users_file: Option<PathBuf>,
    /// Upper bound on tracked stations (`None` = unbounded)
    pub max_stations: Option<usize>,
    /// Seconds a network client gets to authenticate before it is dropped
    pub auth_timeout_secs: u64,
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            reqauth: false,
            trustlocal: false,
            gps_okay_ports: Vec::new(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            users_file: None,
            max_stations: None,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
        }
    }
}

impl RepeaterConfig {
    /// Station freshness window
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Time allowed for the USER/PASS exchange
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Eviction policy derived from `max_stations`
    pub fn eviction_policy(&self) -> EvictionPolicy {
        match self.max_stations {
            Some(n) => EvictionPolicy::MaxEntries(n),
            None => EvictionPolicy::Unbounded,
        }
    }

    /// Whether a transport may re-broadcast GPS beacons
    pub fn gps_allowed(&self, transport_name: &str) -> bool {
        self.gps_okay_ports.is_empty() || self.gps_okay_ports.iter().any(|p| p == transport_name)
    }
}
