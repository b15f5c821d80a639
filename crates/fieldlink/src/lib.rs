//! Transaction core for industrial field-device drivers.
//!
//! fieldlink is the substrate vendor drivers (PLCs, meters, instruments) are
//! built on: one request in flight per channel, transport-agnostic response
//! framing, and a reverse-connection server for devices that dial in.
//!
//! # Crate Structure
//!
//! - [`transport`] - Channel lock and descriptor, TCP/UDP/serial links
//! - [`frame`] - Length-prefixed and delimiter-terminated framing
//! - [`engine`] - Transaction engine, device API, DTU server (behind `engine` feature)

/// Re-export transport types.
pub mod transport {
    pub use fieldlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use fieldlink_frame::*;
}

/// Re-export engine types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod engine {
    pub use fieldlink_engine::*;
}
