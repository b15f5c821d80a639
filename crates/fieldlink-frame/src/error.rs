use std::time::Duration;

/// Errors that can occur while delimiting or exchanging frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header failed the framer's plausibility check.
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    /// No complete frame arrived within the receive timeout.
    #[error("no complete frame within {0:?}")]
    Timeout(Duration),

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// The link accepted zero bytes before the whole request was written.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// A framer was built with unusable parameters.
    #[error("invalid framer configuration: {0}")]
    Config(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

pub(crate) fn transport_to_frame_error(err: fieldlink_transport::TransportError) -> FrameError {
    match err {
        fieldlink_transport::TransportError::Io(io)
        | fieldlink_transport::TransportError::Accept(io) => FrameError::Io(io),
        fieldlink_transport::TransportError::Bind { source, .. }
        | fieldlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
