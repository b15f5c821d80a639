use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use fieldlink_transport::Link;
use tracing::trace;

use crate::error::{transport_to_frame_error, FrameError, Result};
use crate::frame::Frame;
use crate::framer::Framer;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Reads complete frames from a blocking link.
///
/// Handles partial reads internally; callers always get complete frames.
/// Bytes received past the end of a frame stay buffered for the next call.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying link.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner link.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Number of received bytes not yet claimed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop buffered bytes, e.g. after a desynchronized stream.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl<T: Link> FrameReader<T> {
    /// Read the next complete frame, giving up after `timeout`.
    ///
    /// The timeout covers the whole frame: before every read the link's read
    /// timeout is set to whatever budget remains. On `FrameError::Timeout`
    /// the partial frame stays buffered.
    pub fn read_frame<F: Framer + ?Sized>(
        &mut self,
        framer: &F,
        timeout: Duration,
    ) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = framer.decode(&mut self.buf)? {
                trace!(bytes = frame.len(), "frame received");
                return Ok(frame);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::Timeout(timeout));
            }
            self.inner
                .set_read_timeout(Some(remaining))
                .map_err(transport_to_frame_error)?;

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}
