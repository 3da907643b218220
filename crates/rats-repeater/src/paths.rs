//! Outgoing path specifications
//!
//! Device strings come from the repeater settings as `(device, param)`
//! pairs:
//!
//! | Device | Param | Link |
//! |---|---|---|
//! | `net:<host>:<port>` | ignored | TCP client |
//! | `serial:<device>:<baud>` | ignored | serial port |
//! | `<device>` | baud rate | serial port |

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

use crate::error::RepeaterError;
use crate::link::{LinkOptions, StreamTransport};

/// Warm-up timeout for serial links
pub const SERIAL_WARMUP: Duration = Duration::from_secs(3);

/// A parsed outgoing path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec {
    /// TCP connection to another repeater or client
    Net {
        /// Remote host
        host: String,
        /// Remote port
        port: u16,
    },
    /// Local serial device
    Serial {
        /// Device path
        device: String,
        /// Baud rate
        baud: u32,
    },
}

fn invalid(dev: &str, reason: impl Into<String>) -> RepeaterError {
    RepeaterError::InvalidPath {
        path: dev.to_string(),
        reason: reason.into(),
    }
}

fn parse_baud(dev: &str, baud: &str) -> Result<u32, RepeaterError> {
    baud.trim()
        .parse()
        .map_err(|_| invalid(dev, format!("bad baud rate `{}'", baud)))
}

impl PathSpec {
    /// Parse a `(device, param)` pair
    pub fn parse(dev: &str, param: &str) -> Result<Self, RepeaterError> {
        if let Some(rest) = dev.strip_prefix("net:") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| invalid(dev, "expected net:<host>:<port>"))?;
            if host.is_empty() {
                return Err(invalid(dev, "missing host"));
            }
            let port = port
                .parse()
                .map_err(|_| invalid(dev, format!("bad port `{}'", port)))?;
            return Ok(Self::Net {
                host: host.to_string(),
                port,
            });
        }

        if dev.starts_with("tnc:") {
            return Err(invalid(dev, "TNC paths are not supported"));
        }

        if let Some(rest) = dev.strip_prefix("serial:") {
            let (device, baud) = rest
                .rsplit_once(':')
                .ok_or_else(|| invalid(dev, "expected serial:<device>:<baud>"))?;
            return Ok(Self::Serial {
                device: device.to_string(),
                baud: parse_baud(dev, baud)?,
            });
        }

        if dev.is_empty() {
            return Err(invalid(dev, "empty device"));
        }
        Ok(Self::Serial {
            device: dev.to_string(),
            baud: parse_baud(dev, param)?,
        })
    }

    /// Warm-up timeout appropriate for this kind of link
    pub fn warmup_timeout(&self) -> Duration {
        match self {
            Self::Net { .. } => Duration::ZERO,
            Self::Serial { .. } => SERIAL_WARMUP,
        }
    }

    /// Connect and spawn a transport named `name`
    pub async fn open(&self, name: &str) -> Result<Arc<StreamTransport>, RepeaterError> {
        let options = LinkOptions::new(name).warmup(self.warmup_timeout());
        match self {
            Self::Net { host, port } => {
                info!("Socket {}:{}", host, port);
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                Ok(StreamTransport::spawn(stream, options))
            }
            Self::Serial { device, baud } => {
                info!("Serial: {} {}", device, baud);
                let port = tokio_serial::new(device, *baud)
                    .timeout(Duration::from_millis(100))
                    .open_native_async()?;
                Ok(StreamTransport::spawn(port, options))
            }
        }
    }
}
