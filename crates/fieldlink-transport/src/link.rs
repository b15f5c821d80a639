use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::time::Duration;

use crate::error::Result;

/// A connected, blocking byte link to one field device.
///
/// Implemented by [`LinkStream`] for real transports and by test doubles.
/// The frame reader re-arms the read timeout before every read so a frame
/// deadline holds even when bytes trickle in.
pub trait Link: Read + Write + Send {
    /// Set the timeout for the next blocking read. `None` blocks forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

impl<L: Link + ?Sized> Link for &mut L {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

/// Opens links for a channel descriptor.
///
/// The channel calls [`Dial::dial`] whenever its link is absent or flagged
/// broken, and [`Dial::link_lost`] when it drops a link after a transport
/// failure.
pub trait Dial: Send + Sync {
    type Link: Link;

    /// Open a new link within `timeout`.
    fn dial(&self, timeout: Duration) -> Result<Self::Link>;

    /// Human-readable target for logs.
    fn target(&self) -> String;

    /// Called after the channel discarded a broken link.
    fn link_lost(&self, _reason: &str) {}
}

/// A connected field link: TCP stream, connected UDP socket or serial port.
pub struct LinkStream {
    inner: LinkStreamInner,
    target: String,
}

enum LinkStreamInner {
    Tcp(TcpStream),
    Udp(UdpSocket),
    #[cfg(feature = "serial")]
    Serial(Box<dyn tokio_serial::SerialPort>),
}

impl LinkStream {
    pub(crate) fn from_tcp(stream: TcpStream, target: String) -> Self {
        Self {
            inner: LinkStreamInner::Tcp(stream),
            target,
        }
    }

    pub(crate) fn from_udp(socket: UdpSocket, target: String) -> Self {
        Self {
            inner: LinkStreamInner::Udp(socket),
            target,
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn from_serial(port: Box<dyn tokio_serial::SerialPort>, target: String) -> Self {
        Self {
            inner: LinkStreamInner::Serial(port),
            target,
        }
    }

    /// The endpoint this link was opened for.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            LinkStreamInner::Tcp(_) => "tcp",
            LinkStreamInner::Udp(_) => "udp",
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => "serial",
        }
    }

    /// Set write timeout on the underlying transport.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            LinkStreamInner::Udp(socket) => socket.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => Ok(()),
        }
    }
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.read(buf),
            // One datagram per read; a frame may span several datagrams.
            LinkStreamInner::Udp(socket) => socket.recv(buf),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.write(buf),
            LinkStreamInner::Udp(socket) => socket.send(buf),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.flush(),
            LinkStreamInner::Udp(_) => Ok(()),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.flush(),
        }
    }
}

impl Link for LinkStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        #[cfg(feature = "serial")]
        let target = &self.target;
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            LinkStreamInner::Udp(socket) => socket.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port
                .set_timeout(timeout.unwrap_or(Duration::from_secs(u32::MAX as u64)))
                .map_err(|err| crate::TransportError::Serial {
                    port: target.clone(),
                    message: err.to_string(),
                }),
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &self.transport_name())
            .field("target", &self.target)
            .finish()
    }
}
