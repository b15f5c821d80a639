use fieldlink_frame::FrameError;
use fieldlink_transport::TransportError;

/// Errors that can occur during a transaction or while decoding its result.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request or its parameters were rejected before any I/O.
    #[error("invalid request: {0}")]
    Config(String),

    /// No link could be established.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// The request could not be written; the link was discarded.
    #[error("send failed: {0}")]
    Send(#[source] FrameError),

    /// No complete response arrived; the link was discarded.
    #[error("receive failed: {0}")]
    Receive(#[source] FrameError),

    /// The device answered with an error code.
    #[error("device error {code}: {message}")]
    Protocol { code: i32, message: String },

    /// The response was framed correctly but its payload made no sense.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl EngineError {
    /// Whether the failure came from the link rather than the device.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Send(_) | Self::Receive(_))
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Receive(err) | Self::Send(err) => err.is_timeout(),
            Self::Connect(TransportError::ConnectTimeout { .. }) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the DTU server outside a transaction.
#[cfg(feature = "async")]
#[derive(Debug, thiserror::Error)]
pub enum DtuError {
    /// Binding or accepting failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The registration frame was missing, late or unreadable.
    #[error("registration failed: {0}")]
    Registration(String),

    /// The identifier is not on the trust list.
    #[error("device {0} is not trusted")]
    Untrusted(String),

    /// The server has been shut down.
    #[error("DTU server shut down")]
    Shutdown,
}
