//! Suspend-style framing on tokio.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::frame::Frame;
use crate::framer::Framer;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// `tokio_util` decoder over any [`Framer`], for use with `FramedRead`.
#[derive(Clone)]
pub struct FramerCodec {
    framer: Arc<dyn Framer>,
}

impl FramerCodec {
    pub fn new(framer: impl Framer + 'static) -> Self {
        Self {
            framer: Arc::new(framer),
        }
    }

    pub fn from_arc(framer: Arc<dyn Framer>) -> Self {
        Self { framer }
    }
}

impl std::fmt::Debug for FramerCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramerCodec")
            .field("max_frame_size", &self.framer.max_frame_size())
            .finish()
    }
}

impl Decoder for FramerCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        self.framer.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.framer.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

/// Reads complete frames from an async link under one deadline per frame.
pub struct AsyncFrameReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: AsyncRead + Unpin> AsyncFrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Read the next complete frame; the whole frame must arrive within
    /// `timeout`.
    pub async fn read_frame<F: Framer + ?Sized>(
        &mut self,
        framer: &F,
        timeout: Duration,
    ) -> Result<Frame> {
        tokio::time::timeout(timeout, self.read_frame_unbounded(framer))
            .await
            .map_err(|_| FrameError::Timeout(timeout))?
    }

    async fn read_frame_unbounded<F: Framer + ?Sized>(&mut self, framer: &F) -> Result<Frame> {
        loop {
            if let Some(frame) = framer.decode(&mut self.buf)? {
                trace!(bytes = frame.len(), "frame received");
                return Ok(frame);
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Err(FrameError::ConnectionClosed);
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Write the whole request to an async link and flush it.
pub async fn send_async<W>(link: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut offset = 0usize;
    while offset < bytes.len() {
        match link.write(&bytes[offset..]).await? {
            0 => {
                return Err(FrameError::ShortWrite {
                    written: offset,
                    expected: bytes.len(),
                })
            }
            n => offset += n,
        }
    }
    link.flush().await?;
    trace!(bytes = bytes.len(), "request written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::framer::{Delimited, LengthField, LengthPrefixed};

    #[tokio::test]
    async fn framed_read_yields_frames() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FramedRead::new(rx, FramerCodec::new(Delimited::crlf()));

        tx.write_all(b"OK 01\r\nOK").await.unwrap();
        tx.write_all(b" 02\r\n").await.unwrap();
        drop(tx);

        let first = frames.next().await.unwrap().unwrap();
        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(first.content.as_ref(), b"OK 01\r\n");
        assert_eq!(second.content.as_ref(), b"OK 02\r\n");
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn framed_read_eof_mid_frame() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FramedRead::new(rx, FramerCodec::new(Delimited::crlf()));
        tx.write_all(b"OK 01").await.unwrap();
        drop(tx);

        let err = frames.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn async_reader_reassembles_chunks() {
        let (mut tx, rx) = tokio::io::duplex(8);
        let framer = LengthPrefixed::new(LengthField::modbus_tcp());
        let writer = tokio::spawn(async move {
            let wire = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0xAB, 0xCD];
            for chunk in wire.chunks(3) {
                tx.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tx
        });

        let mut reader = AsyncFrameReader::new(rx);
        let frame = reader
            .read_frame(&framer, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(frame.content.as_ref(), &[0x01, 0x03, 0x02, 0xAB, 0xCD]);
        let _tx = writer.await.unwrap();
    }

    #[tokio::test]
    async fn async_reader_times_out() {
        let (_tx, rx) = tokio::io::duplex(8);
        let mut reader = AsyncFrameReader::new(rx);
        let started = tokio::time::Instant::now();
        let err = reader
            .read_frame(&Delimited::lf(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn send_async_writes_everything() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        send_async(&mut tx, b"RD 1\r\n").await.unwrap();
        let mut buf = [0u8; 6];
        rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"RD 1\r\n");
    }
}
