use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::link::{Dial, LinkStream};

/// Parity setting for serial links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    /// 5, 6, 7 or 8.
    pub data_bits: u8,
    /// 1 or 2.
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    /// Settings for `port` at `baud_rate`, 8N1.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(TransportError::Config(
                "serial port name must not be empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::Config(
                "baud rate must be greater than zero".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::Config(format!(
                "data bits must be 5..=8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(TransportError::Config(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

/// Where a channel's link goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Serial(SerialSettings),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::Udp {
            host: host.into(),
            port,
        }
    }

    pub fn serial(settings: SerialSettings) -> Self {
        Self::Serial(settings)
    }

    /// Reject parameters that can never produce a link.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Tcp { host, port } | Self::Udp { host, port } => {
                if host.trim().is_empty() {
                    return Err(TransportError::Config("host must not be empty".to_string()));
                }
                if *port == 0 {
                    return Err(TransportError::Config("port must not be 0".to_string()));
                }
                Ok(())
            }
            Self::Serial(settings) => settings.validate(),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Udp { .. } => "udp",
            Self::Serial(_) => "serial",
        }
    }

    pub(crate) fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let (host, port) = match self {
            Self::Tcp { host, port } | Self::Udp { host, port } => (host.as_str(), *port),
            Self::Serial(_) => {
                return Err(TransportError::Config(
                    "serial endpoints have no socket address".to_string(),
                ))
            }
        };
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|err| TransportError::connect(self.to_string(), err))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Config(format!(
                "{host}:{port} did not resolve to any address"
            )));
        }
        Ok(addrs)
    }

    /// All resolved addresses share one connect budget. Name resolution
    /// itself is not bounded but is charged against it.
    fn dial_tcp(&self, timeout: Duration) -> Result<LinkStream> {
        let deadline = Instant::now() + timeout;
        let addrs = self.resolve()?;
        let stream = connect_within(&self.to_string(), &addrs, deadline, timeout)?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "TCP_NODELAY not applied");
        }
        Ok(LinkStream::from_tcp(stream, self.to_string()))
    }

    fn dial_udp(&self) -> Result<LinkStream> {
        let remote = self.resolve()?[0];
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(|err| TransportError::Bind {
            addr: local.to_string(),
            source: err,
        })?;
        socket
            .connect(remote)
            .map_err(|err| TransportError::connect(self.to_string(), err))?;
        Ok(LinkStream::from_udp(socket, self.to_string()))
    }

    #[cfg(feature = "serial")]
    fn dial_serial(settings: &SerialSettings, timeout: Duration) -> Result<LinkStream> {
        let port = tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(serial_data_bits(settings.data_bits))
            .stop_bits(serial_stop_bits(settings.stop_bits))
            .parity(serial_parity(settings.parity))
            .timeout(timeout)
            .open()
            .map_err(|err| TransportError::Serial {
                port: settings.port.clone(),
                message: err.to_string(),
            })?;
        Ok(LinkStream::from_serial(port, settings.port.clone()))
    }

    #[cfg(not(feature = "serial"))]
    fn dial_serial(settings: &SerialSettings, _timeout: Duration) -> Result<LinkStream> {
        Err(TransportError::Serial {
            port: settings.port.clone(),
            message: "serial support requires the `serial` feature".to_string(),
        })
    }
}

fn connect_within(
    target: &str,
    addrs: &[SocketAddr],
    deadline: Instant,
    budget: Duration,
) -> Result<TcpStream> {
    let timed_out = || TransportError::ConnectTimeout {
        target: target.to_string(),
        after: budget,
    };
    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => last_err = Some(timed_out()),
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                last_err = Some(TransportError::connect(target.to_string(), err));
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        TransportError::Config(format!("{target} did not resolve to any address"))
    }))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Udp { host, port } => write!(f, "udp://{host}:{port}"),
            Self::Serial(s) => write!(f, "serial://{}@{}", s.port, s.baud_rate),
        }
    }
}

impl Dial for Endpoint {
    type Link = LinkStream;

    fn dial(&self, timeout: Duration) -> Result<LinkStream> {
        self.validate()?;
        let link = match self {
            Self::Tcp { .. } => self.dial_tcp(timeout)?,
            Self::Udp { .. } => self.dial_udp()?,
            Self::Serial(settings) => Self::dial_serial(settings, timeout)?,
        };
        info!(endpoint = %self, "link opened");
        Ok(link)
    }

    fn target(&self) -> String {
        self.to_string()
    }
}

#[cfg(feature = "serial")]
pub(crate) fn serial_data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

#[cfg(feature = "serial")]
pub(crate) fn serial_stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

#[cfg(feature = "serial")]
pub(crate) fn serial_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}
