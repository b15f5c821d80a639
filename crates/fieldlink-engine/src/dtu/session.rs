use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use fieldlink_transport::{AsyncChannel, AsyncDial, ChannelOptions, TransportError};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::dtu::event::{emit, DtuEvent};

/// Mutable per-identifier bookkeeping, guarded by its own short-lived lock.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) connected_at: Option<SystemTime>,
    pub(crate) last_activity: Option<SystemTime>,
    /// Bumped by every registration and de-trust; a registration binds its
    /// link only if its generation is still current.
    pub(crate) generation: u64,
}

pub(crate) type SharedState = Arc<Mutex<SessionState>>;

/// Inbound TCP link of a registered device. Records read activity.
#[derive(Debug)]
pub struct DtuLink {
    stream: TcpStream,
    state: SharedState,
}

impl DtuLink {
    pub(crate) fn new(stream: TcpStream, state: SharedState) -> Self {
        Self { stream, state }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// `Ready(true)` once the peer has closed or reset the connection.
    /// Only peeks, so unread bytes stay in the socket.
    pub(crate) fn poll_closed(&self, cx: &mut Context<'_>) -> Poll<bool> {
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match self.stream.poll_peek(cx, &mut buf) {
            Poll::Ready(Ok(n)) => Poll::Ready(n == 0),
            Poll::Ready(Err(err)) => Poll::Ready(err.kind() != io::ErrorKind::WouldBlock),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncRead for DtuLink {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let polled = Pin::new(&mut this.stream).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.state.lock().last_activity = Some(SystemTime::now());
        }
        polled
    }
}

impl AsyncWrite for DtuLink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Dialer of a DTU channel. Links only arrive through registration, so
/// dialing reports the device offline.
#[derive(Debug)]
pub struct DtuDial {
    id: String,
    events: broadcast::Sender<DtuEvent>,
    shutdown: CancellationToken,
}

impl AsyncDial for DtuDial {
    type Link = DtuLink;

    async fn dial(&self, _timeout: Duration) -> fieldlink_transport::Result<DtuLink> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Shutdown);
        }
        Err(TransportError::Offline(self.id.clone()))
    }

    fn target(&self) -> String {
        format!("dtu:{}", self.id)
    }

    fn link_lost(&self, reason: &str) {
        emit(
            &self.events,
            DtuEvent::NetworkError {
                id: self.id.clone(),
                message: reason.to_string(),
            },
        );
        emit(
            &self.events,
            DtuEvent::ClientOffline {
                id: self.id.clone(),
            },
        );
    }
}

/// Stable handle of one trusted identifier.
///
/// The handle outlives individual connections: drivers build an
/// [`crate::AsyncDevice`] on [`DtuDevice::channel`] once, and every
/// registration of the identifier rebinds the same channel.
#[derive(Clone)]
pub struct DtuDevice {
    id: Arc<str>,
    channel: Arc<AsyncChannel<DtuDial>>,
    pub(crate) state: SharedState,
}

impl DtuDevice {
    pub(crate) fn new(
        id: &str,
        options: ChannelOptions,
        events: broadcast::Sender<DtuEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let dial = DtuDial {
            id: id.to_string(),
            events,
            shutdown,
        };
        Self {
            id: Arc::from(id),
            channel: Arc::new(AsyncChannel::new(dial, options)),
            state: SharedState::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &Arc<AsyncChannel<DtuDial>> {
        &self.channel
    }

    /// Link bound and error flag clear. No I/O.
    pub fn is_online(&self) -> bool {
        self.channel.is_open() && !self.channel.is_faulted()
    }

    pub fn session(&self) -> Session {
        let state = self.state.lock();
        Session {
            id: self.id.to_string(),
            peer: state.peer,
            online: self.is_online(),
            connected_at: state.connected_at,
            last_activity: state.last_activity,
            generation: state.generation,
        }
    }
}

impl std::fmt::Debug for DtuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtuDevice")
            .field("id", &self.id)
            .field("online", &self.is_online())
            .finish()
    }
}

/// Point-in-time view of a logical device session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub peer: Option<SocketAddr>,
    pub online: bool,
    pub connected_at: Option<SystemTime>,
    pub last_activity: Option<SystemTime>,
    /// Registration counter of the identifier; grows with every rebind.
    pub generation: u64,
}

impl Session {
    /// Time since the last inbound byte (or the registration).
    pub fn idle(&self) -> Option<Duration> {
        self.last_activity
            .and_then(|at| SystemTime::now().duration_since(at).ok())
    }
}
