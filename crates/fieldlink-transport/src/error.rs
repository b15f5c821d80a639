use std::time::Duration;

/// Errors that can occur while opening or using a field link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A transport parameter was rejected before any I/O took place.
    #[error("invalid transport configuration: {0}")]
    Config(String),

    /// Failed to connect to the remote endpoint.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// The connect attempt did not finish within the connect timeout.
    #[error("connect to {target} timed out after {after:?}")]
    ConnectTimeout { target: String, after: Duration },

    /// Failed to bind a listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on an open link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port driver reported an error.
    #[error("serial port error on {port}: {message}")]
    Serial { port: String, message: String },

    /// The channel cannot dial out and no inbound link is bound to it.
    #[error("device {0} is offline")]
    Offline(String),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Wrap an I/O error raised while connecting to `target`.
    pub fn connect(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            target: target.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
