//! Channel plumbing for field-device drivers.
//!
//! A [`Channel`] owns at most one live link to a remote device and a
//! [`ChannelLock`] that admits one transaction at a time. Links are opened by
//! a [`Dial`] implementation, normally an [`Endpoint`]:
//! - TCP client
//! - UDP (connected socket)
//! - serial port (`serial` feature)
//!
//! The `async` feature adds suspend-style counterparts ([`AsyncChannel`],
//! [`AsyncDial`]) on tokio. This is the lowest layer of fieldlink; framing
//! and transactions build on top of it.

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod lock;
pub mod millis;

#[cfg(feature = "async")]
pub mod async_link;
#[cfg(feature = "async")]
pub mod channel_async;

pub use channel::{
    Channel, ChannelGuard, ChannelOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECEIVE_TIMEOUT,
};
pub use endpoint::{Endpoint, Parity, SerialSettings};
pub use error::{Result, TransportError};
pub use link::{Dial, Link, LinkStream};
pub use lock::{ChannelLock, LockGuard};

#[cfg(feature = "async")]
pub use async_link::{AsyncDial, AsyncLink, AsyncLinkStream};
#[cfg(feature = "async")]
pub use channel_async::{AsyncChannel, AsyncChannelGuard};
#[cfg(feature = "async")]
pub use lock::AsyncChannelLock;
