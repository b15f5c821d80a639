use tracing::{debug, info, warn};

use crate::async_link::AsyncDial;
use crate::channel::{ChannelOptions, LinkStatus};
use crate::error::{Result, TransportError};
use crate::lock::AsyncChannelLock;

/// Suspend-style channel descriptor. Same invariants as [`crate::Channel`];
/// waiting for the lock or the network yields to the runtime instead of
/// blocking a thread.
pub struct AsyncChannel<D: AsyncDial> {
    dialer: D,
    options: ChannelOptions,
    slot: AsyncChannelLock<Option<D::Link>>,
    status: LinkStatus,
}

impl<D: AsyncDial> AsyncChannel<D> {
    pub fn new(dialer: D, options: ChannelOptions) -> Self {
        Self {
            dialer,
            options,
            slot: AsyncChannelLock::new(None),
            status: LinkStatus::default(),
        }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn is_connection_error(&self) -> bool {
        self.status.is_faulted() || !self.status.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_faulted(&self) -> bool {
        self.status.is_faulted()
    }

    pub fn invalidate(&self) {
        self.status.fault();
    }

    pub async fn enter(&self) -> AsyncChannelGuard<'_, D> {
        AsyncChannelGuard {
            channel: self,
            slot: self.slot.enter().await,
            exchanging: false,
        }
    }

    pub fn try_enter(&self) -> Option<AsyncChannelGuard<'_, D>> {
        self.slot.try_enter().map(|slot| AsyncChannelGuard {
            channel: self,
            slot,
            exchanging: false,
        })
    }

    pub async fn close(&self) {
        self.enter().await.disconnect();
    }
}

impl<D: AsyncDial> std::fmt::Debug for AsyncChannel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncChannel")
            .field("target", &self.dialer.target())
            .field("open", &self.status.is_open())
            .field("faulted", &self.status.is_faulted())
            .field("options", &self.options)
            .finish()
    }
}

/// Exclusive use of an [`AsyncChannel`].
///
/// A guard dropped between [`begin_exchange`](Self::begin_exchange) and
/// [`finish_exchange`](Self::finish_exchange) (the caller's future was
/// cancelled mid-transaction) discards the link and sets the error flag: a
/// late reply must never be read as the answer to the next request.
pub struct AsyncChannelGuard<'a, D: AsyncDial> {
    channel: &'a AsyncChannel<D>,
    slot: tokio::sync::MutexGuard<'a, Option<D::Link>>,
    exchanging: bool,
}

impl<'a, D: AsyncDial> AsyncChannelGuard<'a, D> {
    pub fn channel(&self) -> &'a AsyncChannel<D> {
        self.channel
    }

    pub fn is_connection_error(&self) -> bool {
        self.channel.status.is_faulted() || self.slot.is_none()
    }

    pub async fn ensure_connected(&mut self) -> Result<&mut D::Link> {
        if self.is_connection_error() {
            if self.slot.take().is_some() {
                debug!(endpoint = %self.channel.dialer.target(), "dropping faulted link");
            }
            self.channel.status.set(false, true);
            let link = self
                .channel
                .dialer
                .dial(self.channel.options.connect_timeout)
                .await?;
            *self.slot = Some(link);
            self.channel.status.set(true, false);
        }
        match self.slot.as_mut() {
            Some(link) => Ok(link),
            None => Err(TransportError::Offline(self.channel.dialer.target())),
        }
    }

    pub fn link_mut(&mut self) -> Option<&mut D::Link> {
        self.slot.as_mut()
    }

    /// A request is about to go out on the link.
    pub fn begin_exchange(&mut self) {
        self.exchanging = true;
    }

    /// The response was read completely; the link is reusable again.
    pub fn finish_exchange(&mut self) {
        self.exchanging = false;
    }

    pub fn is_exchanging(&self) -> bool {
        self.exchanging
    }

    pub fn mark_broken(&mut self, reason: &str) {
        self.exchanging = false;
        warn!(endpoint = %self.channel.dialer.target(), reason, "link marked broken");
        self.slot.take();
        self.channel.status.set(false, true);
        self.channel.dialer.link_lost(reason);
    }

    pub fn install(&mut self, link: D::Link) {
        self.exchanging = false;
        if self.slot.replace(link).is_some() {
            info!(endpoint = %self.channel.dialer.target(), "previous link replaced");
        }
        self.channel.status.set(true, false);
    }

    pub fn disconnect(&mut self) {
        self.exchanging = false;
        if self.slot.take().is_some() {
            debug!(endpoint = %self.channel.dialer.target(), "link closed");
        }
        self.channel.status.set(false, false);
    }

    pub fn leave(self) {
        drop(self);
    }
}

impl<D: AsyncDial> Drop for AsyncChannelGuard<'_, D> {
    fn drop(&mut self) {
        if self.exchanging {
            self.mark_broken("transaction cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::DuplexStream;

    use super::*;

    #[derive(Default)]
    struct DuplexDial {
        dials: AtomicUsize,
        lost: AtomicUsize,
    }

    impl AsyncDial for Arc<DuplexDial> {
        type Link = DuplexStream;

        async fn dial(&self, _timeout: Duration) -> Result<DuplexStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let (near, _far) = tokio::io::duplex(64);
            Ok(near)
        }

        fn target(&self) -> String {
            "duplex".to_string()
        }

        fn link_lost(&self, _reason: &str) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reconnects_after_mark_broken() {
        let dial = Arc::new(DuplexDial::default());
        let channel = AsyncChannel::new(Arc::clone(&dial), ChannelOptions::default());
        assert!(channel.is_connection_error());

        let mut guard = channel.enter().await;
        guard
            .ensure_connected()
            .await
            .expect("first dial should succeed");
        guard
            .ensure_connected()
            .await
            .expect("open link should be reused");
        assert_eq!(dial.dials.load(Ordering::SeqCst), 1);

        guard.mark_broken("eof");
        assert!(channel.is_faulted());
        assert_eq!(dial.lost.load(Ordering::SeqCst), 1);
        guard
            .ensure_connected()
            .await
            .expect("redial should succeed");
        assert_eq!(dial.dials.load(Ordering::SeqCst), 2);
        guard.leave();

        assert!(!channel.is_connection_error());
        channel.close().await;
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn abandoned_exchange_faults_channel() {
        let dial = Arc::new(DuplexDial::default());
        let channel = AsyncChannel::new(Arc::clone(&dial), ChannelOptions::default());

        let mut guard = channel.enter().await;
        guard
            .ensure_connected()
            .await
            .expect("dial should succeed");
        guard.begin_exchange();
        drop(guard);
        assert!(channel.is_faulted());
        assert!(!channel.is_open());
        assert_eq!(dial.lost.load(Ordering::SeqCst), 1);

        let mut guard = channel.enter().await;
        guard
            .ensure_connected()
            .await
            .expect("redial should succeed");
        guard.begin_exchange();
        guard.finish_exchange();
        guard.leave();
        assert!(!channel.is_connection_error());
        assert_eq!(dial.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_caller_waits_for_guard() {
        let channel = Arc::new(AsyncChannel::new(
            Arc::new(DuplexDial::default()),
            ChannelOptions::default(),
        ));
        let guard = channel.enter().await;
        assert!(channel.try_enter().is_none());

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let _guard = channel.enter().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.expect("waiter should acquire after release");
    }
}
