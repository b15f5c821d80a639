use std::io::{ErrorKind, Write};

use tracing::trace;

use crate::error::{FrameError, Result};
use crate::frame::Frame;

/// Writes complete requests to any `Write` link.
pub struct FrameWriter<T> {
    inner: T,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Write the whole request and flush (blocking).
    ///
    /// A write that accepts zero bytes fails with `FrameError::ShortWrite`.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => {
                    return Err(FrameError::ShortWrite {
                        written: offset,
                        expected: bytes.len(),
                    })
                }
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        trace!(bytes = bytes.len(), "request written");

        self.flush()
    }

    /// Write a frame as it appears on the wire.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(&frame.to_bytes())
    }

    /// Flush the underlying link.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
