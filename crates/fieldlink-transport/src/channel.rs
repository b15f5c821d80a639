use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::link::Dial;
use crate::lock::{ChannelLock, LockGuard};

/// Default connect timeout: 10 s.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Default receive timeout: 5 s.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Timing and lifetime settings of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Budget for opening a link.
    #[serde(rename = "connect_timeout_ms", with = "crate::millis")]
    pub connect_timeout: Duration,
    /// Budget for receiving one complete response frame.
    #[serde(rename = "receive_timeout_ms", with = "crate::millis")]
    pub receive_timeout: Duration,
    /// Pause between sending a request and reading its response.
    #[serde(rename = "request_delay_ms", with = "crate::millis")]
    pub request_delay: Duration,
    /// Keep the link open between transactions. When false the link is
    /// closed after every transaction.
    pub persistent: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            request_delay: Duration::ZERO,
            persistent: true,
        }
    }
}

/// Lock-free view of a channel's link, readable while a transaction holds the lock.
#[derive(Debug, Default)]
pub(crate) struct LinkStatus {
    open: AtomicBool,
    faulted: AtomicBool,
}

impl LinkStatus {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, open: bool, faulted: bool) {
        self.open.store(open, Ordering::Release);
        self.faulted.store(faulted, Ordering::Release);
    }

    pub(crate) fn fault(&self) {
        self.faulted.store(true, Ordering::Release);
    }
}

/// Channel descriptor: one communication path to one remote counterpart.
///
/// Holds the dialer and options, the live link (at most one) behind the
/// channel lock, and an error flag. A set error flag or a missing link forces
/// a reconnect before the next transaction.
pub struct Channel<D: Dial> {
    dialer: D,
    options: ChannelOptions,
    slot: ChannelLock<Option<D::Link>>,
    status: LinkStatus,
}

impl<D: Dial> Channel<D> {
    pub fn new(dialer: D, options: ChannelOptions) -> Self {
        Self {
            dialer,
            options,
            slot: ChannelLock::new(None),
            status: LinkStatus::default(),
        }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Error flag set, or no link open.
    pub fn is_connection_error(&self) -> bool {
        self.status.is_faulted() || !self.status.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_faulted(&self) -> bool {
        self.status.is_faulted()
    }

    /// Whether a transaction currently holds the channel.
    pub fn is_busy(&self) -> bool {
        self.slot.is_held()
    }

    /// Flag the link as broken without touching it; the next transaction reconnects.
    pub fn invalidate(&self) {
        self.status.fault();
    }

    /// Wait for the channel and take exclusive use of it.
    pub fn enter(&self) -> ChannelGuard<'_, D> {
        ChannelGuard {
            channel: self,
            slot: self.slot.enter(),
        }
    }

    /// Take the channel only if no transaction holds it.
    pub fn try_enter(&self) -> Option<ChannelGuard<'_, D>> {
        self.slot.try_enter().map(|slot| ChannelGuard {
            channel: self,
            slot,
        })
    }

    /// Close the link, waiting for any in-flight transaction first.
    pub fn close(&self) {
        self.enter().disconnect();
    }
}

impl<D: Dial> std::fmt::Debug for Channel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("target", &self.dialer.target())
            .field("open", &self.status.is_open())
            .field("faulted", &self.status.is_faulted())
            .field("options", &self.options)
            .finish()
    }
}

/// Exclusive use of a [`Channel`]. Dropping it leaves the channel lock.
pub struct ChannelGuard<'a, D: Dial> {
    channel: &'a Channel<D>,
    slot: LockGuard<'a, Option<D::Link>>,
}

impl<'a, D: Dial> ChannelGuard<'a, D> {
    pub fn channel(&self) -> &'a Channel<D> {
        self.channel
    }

    pub fn is_connection_error(&self) -> bool {
        self.channel.status.is_faulted() || self.slot.is_none()
    }

    /// Return the open link, dialing a new one first if the link is missing
    /// or flagged broken.
    pub fn ensure_connected(&mut self) -> Result<&mut D::Link> {
        if self.is_connection_error() {
            if self.slot.take().is_some() {
                debug!(endpoint = %self.channel.dialer.target(), "dropping faulted link");
            }
            self.channel.status.set(false, true);
            let link = self
                .channel
                .dialer
                .dial(self.channel.options.connect_timeout)?;
            *self.slot = Some(link);
            self.channel.status.set(true, false);
        }
        match self.slot.as_mut() {
            Some(link) => Ok(link),
            None => Err(crate::TransportError::Offline(self.channel.dialer.target())),
        }
    }

    /// The open link, if any, without reconnecting.
    pub fn link_mut(&mut self) -> Option<&mut D::Link> {
        self.slot.as_mut()
    }

    /// Drop the link after a transport failure and set the error flag.
    pub fn mark_broken(&mut self, reason: &str) {
        warn!(endpoint = %self.channel.dialer.target(), reason, "link marked broken");
        self.slot.take();
        self.channel.status.set(false, true);
        self.channel.dialer.link_lost(reason);
    }

    /// Bind an externally established link, replacing (and closing) any previous one.
    pub fn install(&mut self, link: D::Link) {
        if self.slot.replace(link).is_some() {
            info!(endpoint = %self.channel.dialer.target(), "previous link replaced");
        }
        self.channel.status.set(true, false);
    }

    /// Close the link cleanly. The error flag is left clear.
    pub fn disconnect(&mut self) {
        if self.slot.take().is_some() {
            debug!(endpoint = %self.channel.dialer.target(), "link closed");
        }
        self.channel.status.set(false, false);
    }

    /// Leave the channel lock.
    pub fn leave(self) {
        self.slot.leave();
    }
}
