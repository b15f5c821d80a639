use std::fmt;
use std::io;

use fieldlink_engine::{DtuError, EngineError};
use fieldlink_frame::FrameError;
use fieldlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DEVICE_ERROR: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => FAILURE,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::ConnectTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::Config(_) => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::InvalidHeader(_) | FrameError::TooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::Config(_) => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn engine_error(context: &str, err: EngineError) -> CliError {
    match err {
        EngineError::Connect(err) => transport_error(context, err),
        EngineError::Send(err) | EngineError::Receive(err) => frame_error(context, err),
        EngineError::Config(_) => CliError::usage(format!("{context}: {err}")),
        EngineError::Protocol { .. } => CliError::new(DEVICE_ERROR, format!("{context}: {err}")),
        EngineError::Decode(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn dtu_error(context: &str, err: DtuError) -> CliError {
    match err {
        DtuError::Transport(err) => transport_error(context, err),
        DtuError::Registration(_) | DtuError::Untrusted(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        DtuError::Shutdown => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_timeout_code() {
        let err = engine_error(
            "transact failed",
            EngineError::Receive(FrameError::Timeout(Duration::from_secs(1))),
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("transact failed: "));
    }

    #[test]
    fn device_faults_are_distinct_from_transport_failures() {
        let fault = engine_error(
            "read",
            EngineError::Protocol {
                code: 2,
                message: "illegal address".to_string(),
            },
        );
        assert_eq!(fault.code, DEVICE_ERROR);

        let refused = engine_error(
            "read",
            EngineError::Connect(TransportError::connect(
                "tcp://127.0.0.1:1",
                io::Error::from(io::ErrorKind::ConnectionRefused),
            )),
        );
        assert_eq!(refused.code, FAILURE);
    }

    #[test]
    fn bind_in_use_is_failure() {
        let err = dtu_error(
            "bind",
            DtuError::Transport(TransportError::Bind {
                addr: "0.0.0.0:9000".to_string(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            }),
        );
        assert_eq!(err.code, FAILURE);
    }
}
