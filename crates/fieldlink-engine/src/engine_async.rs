use std::sync::Arc;

use fieldlink_frame::{send_async, AsyncFrameReader, Frame, Framer};
use fieldlink_transport::{AsyncChannel, AsyncDial, AsyncLink, ChannelOptions, TransportError};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Suspend-style [`crate::TransactionEngine`]. Same ordering guarantees;
/// waits on the channel lock, the connect, the send and the receive yield
/// to the runtime.
#[derive(Clone)]
pub struct AsyncTransactionEngine {
    framer: Arc<dyn Framer>,
}

impl AsyncTransactionEngine {
    pub fn new(framer: impl Framer + 'static) -> Self {
        Self {
            framer: Arc::new(framer),
        }
    }

    pub fn from_arc(framer: Arc<dyn Framer>) -> Self {
        Self { framer }
    }

    pub fn framer(&self) -> &dyn Framer {
        self.framer.as_ref()
    }

    pub async fn transact<D: AsyncDial>(
        &self,
        channel: &AsyncChannel<D>,
        request: &[u8],
    ) -> Result<Frame> {
        if request.is_empty() {
            return Err(EngineError::Config("empty request".to_string()));
        }

        let mut guard = channel.enter().await;
        let options = *channel.options();
        guard
            .ensure_connected()
            .await
            .map_err(EngineError::Connect)?;

        // Dropping the guard from here on (cancelled future) discards the link.
        guard.begin_exchange();
        let outcome = match guard.link_mut() {
            Some(link) => send_receive(link, self.framer.as_ref(), request, &options).await,
            None => Err(EngineError::Connect(TransportError::Offline(
                channel.dialer().target(),
            ))),
        };

        match outcome {
            Ok(frame) => {
                guard.finish_exchange();
                debug!(
                    endpoint = %channel.dialer().target(),
                    bytes = frame.len(),
                    "transaction complete"
                );
                if !options.persistent {
                    guard.disconnect();
                }
                Ok(frame)
            }
            Err(err) => {
                guard.mark_broken(&err.to_string());
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for AsyncTransactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTransactionEngine")
            .field("max_frame_size", &self.framer.max_frame_size())
            .finish()
    }
}

async fn send_receive<L: AsyncLink>(
    link: &mut L,
    framer: &dyn Framer,
    request: &[u8],
    options: &ChannelOptions,
) -> Result<Frame> {
    send_async(&mut *link, request)
        .await
        .map_err(EngineError::Send)?;

    if !options.request_delay.is_zero() {
        tokio::time::sleep(options.request_delay).await;
    }

    let frame = AsyncFrameReader::new(link)
        .read_frame(framer, options.receive_timeout)
        .await
        .map_err(EngineError::Receive)?;
    Ok(frame.with_sent(request.to_vec()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use fieldlink_frame::{Delimited, FrameError};
    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use super::*;

    /// Each dial spawns a line echo device on the far end of a duplex pipe.
    #[derive(Default)]
    struct EchoDial {
        dials: AtomicUsize,
        silent: bool,
        /// Added to the 10 ms the device takes per response.
        lag: Duration,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl AsyncDial for EchoDial {
        type Link = DuplexStream;

        async fn dial(&self, _timeout: Duration) -> fieldlink_transport::Result<DuplexStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let (near, far) = tokio::io::duplex(256);
            let silent = self.silent;
            let lag = self.lag;
            let log = Arc::clone(&self.log);
            tokio::spawn(async move {
                let (read, mut write) = tokio::io::split(far);
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log.lock().push(format!("req {line}"));
                    if silent {
                        continue;
                    }
                    tokio::time::sleep(Duration::from_millis(10) + lag).await;
                    log.lock().push(format!("resp {line}"));
                    if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
            Ok(near)
        }

        fn target(&self) -> String {
            "echo".to_string()
        }
    }

    fn options(receive_ms: u64) -> ChannelOptions {
        ChannelOptions {
            receive_timeout: Duration::from_millis(receive_ms),
            ..ChannelOptions::default()
        }
    }

    #[tokio::test]
    async fn transact_round_trip() {
        let channel = AsyncChannel::new(EchoDial::default(), options(500));
        let engine = AsyncTransactionEngine::new(Delimited::lf());
        let frame = engine.transact(&channel, b"ping\n").await.unwrap();
        assert_eq!(frame.content.as_ref(), b"ping\n");
        assert_eq!(frame.sent.as_deref(), Some(&b"ping\n"[..]));
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn concurrent_transactions_never_interleave() {
        let channel = Arc::new(AsyncChannel::new(EchoDial::default(), options(1_000)));
        let engine = AsyncTransactionEngine::new(Delimited::lf());

        let mut tasks = Vec::new();
        for i in 0..4 {
            let channel = Arc::clone(&channel);
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                let request = format!("m{i}\n");
                let frame = engine.transact(&channel, request.as_bytes()).await.unwrap();
                assert_eq!(frame.content.as_ref(), request.as_bytes());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = channel.dialer().log.lock().clone();
        assert_eq!(log.len(), 8);
        for pair in log.chunks(2) {
            let req = pair[0].strip_prefix("req ").unwrap();
            let resp = pair[1].strip_prefix("resp ").unwrap();
            assert_eq!(req, resp);
        }
        assert_eq!(channel.dialer().dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_releases_lock_and_forces_redial() {
        let channel = AsyncChannel::new(
            EchoDial {
                silent: true,
                ..EchoDial::default()
            },
            options(60),
        );
        let engine = AsyncTransactionEngine::new(Delimited::lf());

        let started = tokio::time::Instant::now();
        let err = engine.transact(&channel, b"x\n").await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(matches!(err, EngineError::Receive(FrameError::Timeout(_))));
        assert!(channel.is_faulted());
        assert!(channel.try_enter().is_some());

        let _ = engine.transact(&channel, b"y\n").await;
        assert_eq!(channel.dialer().dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_transaction_never_leaks_its_reply() {
        let channel = AsyncChannel::new(
            EchoDial {
                lag: Duration::from_millis(90),
                ..EchoDial::default()
            },
            options(1_000),
        );
        let engine = AsyncTransactionEngine::new(Delimited::lf());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(30), engine.transact(&channel, b"first\n"))
                .await;
        assert!(cancelled.is_err(), "transaction should have been cancelled");
        assert!(channel.is_faulted());
        assert!(!channel.is_open());
        assert!(channel.try_enter().is_some());

        let frame = engine.transact(&channel, b"second\n").await.unwrap();
        assert_eq!(frame.content.as_ref(), b"second\n");
        assert_eq!(channel.dialer().dials.load(Ordering::SeqCst), 2);
    }
}
