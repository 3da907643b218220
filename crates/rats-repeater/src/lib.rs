//! D-RATS Repeater Engine
//!
//! This crate relays D-RATS frames between any number of links ("paths"):
//! serial radios, TCP connections to other repeaters, and network clients
//! accepted at runtime.
//!
//! # Architecture
//!
//! - **Transport**: the contract a link offers (send a frame, report its
//!   name and health, hand received frames to a handler)
//! - **StreamTransport**: a `Transport` over any async byte stream, running
//!   DDT2 framing in its own task
//! - **StationTable**: which path each callsign was last heard on, and when
//! - **Repeater**: owns the paths and the table, makes the forwarding
//!   decision for every inbound frame, and runs the accept loop for data
//!   and GPS clients
//!
//! A destination heard within the last 600 seconds on a live path gets the
//! frame directly; anything else is repeated on every other path.
//!
//! # Example
//!
//! ```rust,no_run
//! use rats_repeater::{listen_on, Listeners, PathSpec, Repeater, RepeaterConfig};
//!
//! # async fn run() -> Result<(), rats_repeater::RepeaterError> {
//! let repeater = Repeater::new("W1AW", RepeaterConfig::default());
//!
//! let radio = PathSpec::parse("/dev/ttyUSB0", "9600")?;
//! repeater.add_new_transport(radio.open("/dev/ttyUSB0").await?);
//!
//! repeater.repeat(Listeners {
//!     data: Some(listen_on(9000)?),
//!     gps: Some(listen_on(9500)?),
//! })?;
//!
//! // ...
//! repeater.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod link;
pub mod listener;
pub mod paths;
pub mod repeater;
pub mod station;
pub mod transport;

pub use auth::{auth_exchange, auth_user, AuthPolicy, Credentials};
pub use config::RepeaterConfig;
pub use error::RepeaterError;
pub use link::{LinkOptions, StreamTransport};
pub use listener::{listen_on, listen_on_addr, Listeners};
pub use paths::PathSpec;
pub use repeater::{Repeater, StationStatus};
pub use station::{CallInfo, EvictionPolicy, Sighting, StationTable};
pub use transport::{FrameHandler, Transport, TransportId};
