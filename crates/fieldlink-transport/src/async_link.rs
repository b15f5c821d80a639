use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// A connected, suspend-style byte link. Blanket-implemented for every
/// unpinned tokio stream.
pub trait AsyncLink: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncLink for T {}

/// Async counterpart of [`crate::Dial`].
pub trait AsyncDial: Send + Sync {
    type Link: AsyncLink;

    /// Open a new link within `timeout`.
    fn dial(&self, timeout: Duration) -> impl Future<Output = Result<Self::Link>> + Send;

    /// Human-readable target for logs.
    fn target(&self) -> String;

    /// Called after the channel discarded a broken link.
    fn link_lost(&self, _reason: &str) {}
}

/// Async field link: TCP stream, connected UDP socket or serial stream.
#[derive(Debug)]
pub enum AsyncLinkStream {
    Tcp(TcpStream),
    Udp(UdpSocket),
    #[cfg(feature = "serial")]
    Serial(tokio_serial::SerialStream),
}

impl AsyncLinkStream {
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Udp(_) => "udp",
            #[cfg(feature = "serial")]
            Self::Serial(_) => "serial",
        }
    }
}

impl AsyncRead for AsyncLinkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Udp(socket) => socket.poll_recv(cx, buf),
            #[cfg(feature = "serial")]
            Self::Serial(port) => Pin::new(port).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncLinkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Udp(socket) => socket.poll_send(cx, buf),
            #[cfg(feature = "serial")]
            Self::Serial(port) => Pin::new(port).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Udp(_) => Poll::Ready(Ok(())),
            #[cfg(feature = "serial")]
            Self::Serial(port) => Pin::new(port).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Udp(_) => Poll::Ready(Ok(())),
            #[cfg(feature = "serial")]
            Self::Serial(port) => Pin::new(port).poll_shutdown(cx),
        }
    }
}

impl Endpoint {
    async fn resolve_async(&self) -> Result<Vec<SocketAddr>> {
        let (host, port) = match self {
            Self::Tcp { host, port } | Self::Udp { host, port } => (host.as_str(), *port),
            Self::Serial(_) => {
                return Err(TransportError::Config(
                    "serial endpoints have no socket address".to_string(),
                ))
            }
        };
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|err| TransportError::connect(self.to_string(), err))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Config(format!(
                "{host}:{port} did not resolve to any address"
            )));
        }
        Ok(addrs)
    }

    async fn dial_tcp_async(&self) -> Result<AsyncLinkStream> {
        let mut last_err = None;
        for addr in self.resolve_async().await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%addr, error = %err, "TCP_NODELAY not applied");
                    }
                    return Ok(AsyncLinkStream::Tcp(stream));
                }
                Err(err) => last_err = Some(TransportError::connect(self.to_string(), err)),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            TransportError::Config(format!("{self} did not resolve to any address"))
        }))
    }

    async fn dial_udp_async(&self) -> Result<AsyncLinkStream> {
        let remote = self.resolve_async().await?[0];
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|err| TransportError::Bind {
                addr: local.to_string(),
                source: err,
            })?;
        socket
            .connect(remote)
            .await
            .map_err(|err| TransportError::connect(self.to_string(), err))?;
        Ok(AsyncLinkStream::Udp(socket))
    }

    #[cfg(feature = "serial")]
    fn dial_serial_async(settings: &crate::SerialSettings) -> Result<AsyncLinkStream> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(crate::endpoint::serial_data_bits(settings.data_bits))
            .stop_bits(crate::endpoint::serial_stop_bits(settings.stop_bits))
            .parity(crate::endpoint::serial_parity(settings.parity))
            .open_native_async()
            .map_err(|err| TransportError::Serial {
                port: settings.port.clone(),
                message: err.to_string(),
            })?;
        Ok(AsyncLinkStream::Serial(port))
    }

    #[cfg(not(feature = "serial"))]
    fn dial_serial_async(settings: &crate::SerialSettings) -> Result<AsyncLinkStream> {
        Err(TransportError::Serial {
            port: settings.port.clone(),
            message: "serial support requires the `serial` feature".to_string(),
        })
    }
}

impl AsyncDial for Endpoint {
    type Link = AsyncLinkStream;

    async fn dial(&self, timeout: Duration) -> Result<AsyncLinkStream> {
        self.validate()?;
        let opened = tokio::time::timeout(timeout, async {
            match self {
                Self::Tcp { .. } => self.dial_tcp_async().await,
                Self::Udp { .. } => self.dial_udp_async().await,
                Self::Serial(settings) => Self::dial_serial_async(settings),
            }
        })
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            target: self.to_string(),
            after: timeout,
        })??;
        info!(endpoint = %self, "link opened");
        Ok(opened)
    }

    fn target(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn dial_tcp_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let port = listener.local_addr().expect("addr should exist").port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept should succeed");
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.expect("read should succeed");
            stream.write_all(&buf).await.expect("echo should succeed");
        });

        let endpoint = Endpoint::tcp("127.0.0.1", port);
        let mut link = AsyncDial::dial(&endpoint, Duration::from_secs(2))
            .await
            .expect("dial should succeed");
        assert_eq!(link.transport_name(), "tcp");
        link.write_all(b"ping").await.expect("write should succeed");
        let mut buf = [0u8; 4];
        link.read_exact(&mut buf).await.expect("read should succeed");
        assert_eq!(&buf, b"ping");
        server.await.expect("server task should finish");
    }

    #[tokio::test]
    async fn dial_rejects_invalid_endpoint() {
        let endpoint = Endpoint::tcp("127.0.0.1", 0);
        let err = AsyncDial::dial(&endpoint, Duration::from_secs(1))
            .await
            .expect_err("port 0 should be rejected");
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[tokio::test]
    async fn dial_udp_exchanges_datagrams() {
        let peer = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("peer should bind");
        let port = peer.local_addr().expect("addr should exist").port();

        let endpoint = Endpoint::udp("127.0.0.1", port);
        let mut link = AsyncDial::dial(&endpoint, Duration::from_secs(1))
            .await
            .expect("dial should succeed");
        link.write_all(b"req").await.expect("send should succeed");

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.expect("recv should succeed");
        assert_eq!(&buf[..n], b"req");
        peer.send_to(b"resp", from).await.expect("reply should succeed");

        let mut reply = [0u8; 16];
        let n = link.read(&mut reply).await.expect("read should succeed");
        assert_eq!(&reply[..n], b"resp");
    }
}
