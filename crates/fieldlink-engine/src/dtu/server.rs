use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, SystemTime};

use fieldlink_frame::{send_async, AsyncFrameReader};
use fieldlink_transport::TransportError;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dtu::event::{drain, emit, DtuEvent};
use crate::dtu::registration::{Registration, Verdict};
use crate::dtu::session::{DtuDevice, DtuLink, Session};
use crate::dtu::DtuConfig;
use crate::error::DtuError;

/// Pause after a failed `accept` so a persistent error (fd exhaustion)
/// does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How often an idle bound link is checked for a vanished peer.
const WATCH_INTERVAL: Duration = Duration::from_millis(200);

/// Listener multiplexing inbound device connections onto stable
/// [`DtuDevice`] handles.
///
/// The session map is guarded by one lock held only for lookups and
/// mapping updates, never across I/O. Each connection registers on its own
/// task, so a slow or hostile peer cannot stall the accept loop.
pub struct DtuServer {
    inner: Arc<ServerInner>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

struct ServerInner {
    config: DtuConfig,
    registration: Box<dyn Registration>,
    registry: Mutex<HashMap<String, DtuDevice>>,
    events: broadcast::Sender<DtuEvent>,
    shutdown: CancellationToken,
}

impl DtuServer {
    /// Bind the listener and start accepting.
    pub async fn bind(
        config: DtuConfig,
        registration: impl Registration,
    ) -> Result<Self, DtuError> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.bind.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(ServerInner {
            registration: Box::new(registration),
            registry: Mutex::new(HashMap::new()),
            events,
            shutdown: CancellationToken::new(),
            config,
        });
        inner.add_trusted(&mut inner.registry.lock(), &inner.config.trust_list);

        let accept_task = tokio::spawn(accept_loop(Arc::clone(&inner), listener));
        info!(
            %local_addr,
            trusted = inner.config.trust_list.len(),
            "DTU server listening"
        );
        Ok(Self {
            inner,
            accept_task: Mutex::new(Some(accept_task)),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &DtuConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DtuEvent> {
        self.inner.events.subscribe()
    }

    /// Consume events on a dedicated task. A handler that falls behind
    /// skips events instead of slowing the server.
    pub fn spawn_event_handler<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: FnMut(DtuEvent) + Send + 'static,
    {
        tokio::spawn(drain(self.subscribe(), handler))
    }

    /// Handle of a trusted identifier, whether or not it is connected.
    pub fn by_identifier(&self, id: &str) -> Option<DtuDevice> {
        self.inner.registry.lock().get(id).cloned()
    }

    /// Like [`DtuServer::by_identifier`], with the reason when absent.
    pub fn device(&self, id: &str) -> Result<DtuDevice, DtuError> {
        if self.is_shut_down() {
            return Err(DtuError::Shutdown);
        }
        self.by_identifier(id)
            .ok_or_else(|| DtuError::Untrusted(id.to_string()))
    }

    /// Sessions of every trusted identifier that has registered at least
    /// once, sorted by identifier. Offline sessions stay visible.
    pub fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .list_devices()
            .iter()
            .map(DtuDevice::session)
            .filter(|session| session.connected_at.is_some())
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// Handles of all trusted identifiers, sorted by identifier.
    pub fn list_devices(&self) -> Vec<DtuDevice> {
        let mut devices: Vec<DtuDevice> = self.inner.registry.lock().values().cloned().collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    pub fn is_client_online(&self, id: &str) -> bool {
        self.by_identifier(id).is_some_and(|device| device.is_online())
    }

    pub fn trust_list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.registry.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace the trust list. Identifiers no longer trusted are
    /// disconnected and their handles removed; new ones get fresh handles.
    pub async fn set_trust_list<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wanted: Vec<String> = ids.into_iter().map(Into::into).collect();
        let removed: Vec<DtuDevice> = {
            let mut registry = self.inner.registry.lock();
            let stale: Vec<String> = registry
                .keys()
                .filter(|id| !wanted.contains(*id))
                .cloned()
                .collect();
            let removed = stale
                .iter()
                .filter_map(|id| registry.remove(id))
                .inspect(|device| device.state.lock().generation += 1)
                .collect();
            self.inner.add_trusted(&mut registry, &wanted);
            removed
        };

        for device in removed {
            let was_online = device.is_online();
            device.channel().close().await;
            info!(id = device.id(), "device removed from trust list");
            if was_online {
                emit(
                    &self.inner.events,
                    DtuEvent::ClientOffline {
                        id: device.id().to_string(),
                    },
                );
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop accepting, discard pending registrations and close every bound
    /// link. Handles stay valid but read offline.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "accept task ended abnormally");
            }
        }

        for device in self.list_devices() {
            let was_online = device.is_online();
            device.channel().close().await;
            if was_online {
                emit(
                    &self.inner.events,
                    DtuEvent::ClientOffline {
                        id: device.id().to_string(),
                    },
                );
            }
        }
        info!(addr = %self.local_addr, "DTU server shut down");
    }
}

impl Drop for DtuServer {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for DtuServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtuServer")
            .field("local_addr", &self.local_addr)
            .field("trusted", &self.inner.registry.lock().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl ServerInner {
    fn add_trusted(&self, registry: &mut HashMap<String, DtuDevice>, ids: &[String]) {
        for id in ids {
            registry.entry(id.clone()).or_insert_with(|| {
                DtuDevice::new(
                    id,
                    self.config.channel,
                    self.events.clone(),
                    self.shutdown.clone(),
                )
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        let registered = tokio::select! {
            () = self.shutdown.cancelled() => {
                debug!(%peer, "registration discarded by shutdown");
                return;
            }
            registered = self.read_registration(&mut stream) => registered,
        };
        let id = match registered {
            Ok(id) => id,
            Err(err) => {
                warn!(%peer, error = %err, "registration failed");
                return;
            }
        };

        // Claim the slot under the map lock so a concurrent de-trust or a
        // newer registration invalidates this one.
        let claim = {
            let registry = self.registry.lock();
            registry.get(&id).map(|device| {
                let mut state = device.state.lock();
                state.generation += 1;
                (device.clone(), state.generation)
            })
        };
        let Some((device, generation)) = claim else {
            self.send_reply(&mut stream, Verdict::Rejected).await;
            warn!(%peer, id = %id, "untrusted device rejected");
            emit(&self.events, DtuEvent::Rejected { id, peer });
            return;
        };

        self.send_reply(&mut stream, Verdict::Accepted).await;

        let mut guard = device.channel().enter().await;
        let current = device.state.lock().generation == generation;
        if !current || self.shutdown.is_cancelled() {
            debug!(%peer, id = %id, "registration superseded before binding");
            return;
        }
        guard.install(DtuLink::new(stream, Arc::clone(&device.state)));
        drop(guard);

        let now = SystemTime::now();
        {
            let mut state = device.state.lock();
            state.peer = Some(peer);
            state.connected_at = Some(now);
            state.last_activity = Some(now);
        }
        info!(%peer, id = %id, "device registered");
        tokio::spawn(Arc::clone(&self).watch_link(device, generation));
        emit(&self.events, DtuEvent::ClientConnected { id, peer });
    }

    /// Take a bound link offline when its peer goes away between
    /// transactions. Runs until the link is replaced, closed or lost.
    async fn watch_link(self: Arc<Self>, device: DtuDevice, generation: u64) {
        let mut ticker = tokio::time::interval(WATCH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            // A transaction in flight owns the link and reports its loss.
            let Some(mut guard) = device.channel().try_enter() else {
                continue;
            };
            if device.state.lock().generation != generation {
                return;
            }
            let Some(link) = guard.link_mut() else {
                return;
            };
            let closed =
                std::future::poll_fn(|cx| Poll::Ready(link.poll_closed(cx) == Poll::Ready(true)))
                    .await;
            if closed {
                info!(id = device.id(), "idle device link closed by peer");
                guard.mark_broken("connection closed by peer");
                return;
            }
        }
    }

    async fn read_registration(&self, stream: &mut TcpStream) -> Result<String, DtuError> {
        let mut reader = AsyncFrameReader::new(&mut *stream);
        let frame = reader
            .read_frame(self.registration.framer(), self.config.registration_timeout)
            .await
            .map_err(|err| DtuError::Registration(err.to_string()))?;
        if reader.buffered() > 0 {
            debug!(
                bytes = reader.buffered(),
                "bytes after registration frame discarded"
            );
        }
        self.registration.identify(&frame)
    }

    async fn send_reply(&self, stream: &mut TcpStream, verdict: Verdict) {
        let Some(reply) = self.registration.reply(verdict) else {
            return;
        };
        if let Err(err) = send_async(stream, &reply).await {
            debug!(?verdict, error = %err, "registration reply not delivered");
        }
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    tokio::spawn(Arc::clone(&inner).handle_connection(stream, peer));
                }
                Err(err) => {
                    let err = TransportError::Accept(err);
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}
