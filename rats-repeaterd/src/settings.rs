//! Daemon settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use rats_repeater::config::{DEFAULT_GPS_PORT, DEFAULT_NET_PORT};
use rats_repeater::RepeaterConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Name of the users file kept next to the settings file
pub const USERS_FILE: &str = "users.txt";

/// Repeater daemon settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Outgoing paths as `(device, param)` pairs
    pub devices: Vec<(String, String)>,
    /// Accept network clients
    pub acceptnet: bool,
    /// Port for data clients
    pub netport: u16,
    /// Port for raw GPS consumers
    pub gpsport: u16,
    /// Repeater callsign, also the station id text
    pub id: String,
    /// Minutes between station id announcements (0 = never)
    pub idfreq: u64,
    /// Require USER/PASS from network clients
    pub require_auth: bool,
    /// Skip authentication for loopback clients
    pub trust_local: bool,
    /// Path names allowed to re-broadcast GPS (empty = all)
    pub allow_gps: Vec<String>,
    /// Upper bound on tracked stations
    pub max_stations: Option<usize>,
    /// Seconds between status log lines (0 = never)
    pub status_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            acceptnet: true,
            netport: DEFAULT_NET_PORT,
            gpsport: DEFAULT_GPS_PORT,
            id: "W1AW".to_string(),
            idfreq: 30,
            require_auth: false,
            trust_local: true,
            allow_gps: Vec::new(),
            max_stations: None,
            status_interval_secs: 60,
        }
    }
}

impl Settings {
    /// Get the XDG config directory for d-rats
    /// Uses $XDG_CONFIG_HOME/d-rats when absolute, falls back to the platform config dir
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("d-rats"));
            }
        }

        dirs::config_dir().map(|dir| dir.join("d-rats"))
    }

    /// Default settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("repeater.json"))
    }

    /// Load settings from `path`; a missing file gives the defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save settings to `path`
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Engine policy, with the users file looked up in `config_dir`
    pub fn repeater_config(&self, config_dir: &Path) -> RepeaterConfig {
        RepeaterConfig {
            reqauth: self.require_auth,
            trustlocal: self.trust_local,
            gps_okay_ports: self
                .allow_gps
                .iter()
                .map(|port| port.trim())
                .filter(|port| !port.is_empty())
                .map(str::to_string)
                .collect(),
            users_file: Some(config_dir.join(USERS_FILE)),
            max_stations: self.max_stations,
            ..Default::default()
        }
    }
}
