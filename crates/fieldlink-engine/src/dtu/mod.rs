//! Reverse-connection ("DTU") server.
//!
//! Field devices behind NAT or on cellular modems dial *in* and announce an
//! identifier in a registration frame. The server checks the identifier
//! against a trust list and binds the connection into that identifier's
//! stable [`DtuDevice`] channel, which drivers then use exactly like a dialed
//! channel. A reconnect with the same identifier supersedes the old link.

mod event;
mod registration;
mod server;
mod session;

use std::time::Duration;

use fieldlink_transport::ChannelOptions;
use serde::{Deserialize, Serialize};

pub use event::DtuEvent;
pub use registration::{HsHeader, HsRegistration, LineRegistration, Registration, Verdict};
pub use server::DtuServer;
pub use session::{DtuDevice, DtuDial, DtuLink, Session};

/// Default window for the registration frame: 10 s.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Server configuration. Loadable from JSON; durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtuConfig {
    /// Listen address, e.g. `0.0.0.0:9000`.
    pub bind: String,
    /// Accepted identifiers, matched exactly.
    pub trust_list: Vec<String>,
    #[serde(
        rename = "registration_timeout_ms",
        with = "fieldlink_transport::millis"
    )]
    pub registration_timeout: Duration,
    /// Options of every device channel. Only the receive timeout and the
    /// request delay matter; DTU channels never dial.
    pub channel: ChannelOptions,
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for DtuConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9000".to_string(),
            trust_list: Vec::new(),
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            channel: ChannelOptions::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
