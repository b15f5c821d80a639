use std::sync::Arc;

use bytes::BytesMut;

use crate::error::{FrameError, Result};
use crate::frame::Frame;

/// Default maximum frame size: 64 KiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// ASCII end-of-text.
pub const ETX: u8 = 0x03;

/// Decides where one protocol frame ends in a byte stream.
///
/// `decode` returns `Ok(None)` until `src` holds a complete frame, then
/// removes exactly that frame from the front of `src`. Bytes past the frame
/// stay in the buffer.
pub trait Framer: Send + Sync {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>>;

    /// Largest frame this framer accepts before giving up.
    fn max_frame_size(&self) -> usize;
}

impl<F: Framer + ?Sized> Framer for &F {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        (**self).decode(src)
    }

    fn max_frame_size(&self) -> usize {
        (**self).max_frame_size()
    }
}

impl<F: Framer + ?Sized> Framer for Arc<F> {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        (**self).decode(src)
    }

    fn max_frame_size(&self) -> usize {
        (**self).max_frame_size()
    }
}

impl<F: Framer + ?Sized> Framer for Box<F> {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        (**self).decode(src)
    }

    fn max_frame_size(&self) -> usize {
        (**self).max_frame_size()
    }
}

/// Fixed-size header of a length-prefixed protocol.
pub trait FrameHeader: Send + Sync {
    /// Number of header bytes, known before anything is read.
    fn header_len(&self) -> usize;

    /// Plausibility check (magic bytes, tokens). `header` is exactly
    /// `header_len()` bytes.
    fn is_valid(&self, _header: &[u8]) -> bool {
        true
    }

    /// Number of bytes following the header. Must depend on the header only.
    fn content_len(&self, header: &[u8]) -> Result<usize>;
}

/// Framer for protocols whose header announces the content length.
#[derive(Debug, Clone)]
pub struct LengthPrefixed<H> {
    header: H,
    max_frame_size: usize,
}

impl<H: FrameHeader> LengthPrefixed<H> {
    pub fn new(header: H) -> Self {
        Self {
            header,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn header(&self) -> &H {
        &self.header
    }
}

impl<H: FrameHeader> Framer for LengthPrefixed<H> {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let header_len = self.header.header_len();
        if src.len() < header_len {
            return Ok(None);
        }

        let header = &src[..header_len];
        if !self.header.is_valid(header) {
            return Err(FrameError::InvalidHeader(format!(
                "unexpected header bytes {header:02X?}"
            )));
        }

        let content_len = self.header.content_len(header)?;
        if content_len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: content_len,
                max: self.max_frame_size,
            });
        }

        let total = header_len + content_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let header = src.split_to(header_len).freeze();
        let content = src.split_to(content_len).freeze();
        Ok(Some(Frame::new(header, content)))
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

/// Header description covering the common binary layouts: optional magic
/// bytes at a fixed offset and an unsigned length field of 1, 2 or 4 bytes.
///
/// The content length is the field value plus `adjust`, which absorbs
/// protocols whose length counts bytes already inside the header (negative
/// adjust) or a trailer after the counted block (positive adjust).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthField {
    header_len: usize,
    length_offset: usize,
    length_width: usize,
    big_endian: bool,
    adjust: i64,
    magic: Option<(usize, Vec<u8>)>,
}

impl LengthField {
    /// Big-endian length field of `length_width` bytes at `length_offset`.
    pub fn new(header_len: usize, length_offset: usize, length_width: usize) -> Result<Self> {
        if !matches!(length_width, 1 | 2 | 4) {
            return Err(FrameError::Config(format!(
                "length field must be 1, 2 or 4 bytes, got {length_width}"
            )));
        }
        if length_offset + length_width > header_len {
            return Err(FrameError::Config(format!(
                "length field {length_offset}..{} lies outside the {header_len}-byte header",
                length_offset + length_width
            )));
        }
        Ok(Self {
            header_len,
            length_offset,
            length_width,
            big_endian: true,
            adjust: 0,
            magic: None,
        })
    }

    /// Require `magic` at `offset` in every header.
    pub fn with_magic(mut self, offset: usize, magic: &[u8]) -> Result<Self> {
        if magic.is_empty() || offset + magic.len() > self.header_len {
            return Err(FrameError::Config(format!(
                "magic of {} bytes at {offset} does not fit the {}-byte header",
                magic.len(),
                self.header_len
            )));
        }
        self.magic = Some((offset, magic.to_vec()));
        Ok(self)
    }

    pub fn little_endian(mut self) -> Self {
        self.big_endian = false;
        self
    }

    pub fn with_adjust(mut self, adjust: i64) -> Self {
        self.adjust = adjust;
        self
    }

    /// Modbus TCP MBAP header: protocol id `00 00` at 2, big-endian length at
    /// 4 counting the unit id and PDU.
    pub fn modbus_tcp() -> Self {
        Self {
            header_len: 6,
            length_offset: 4,
            length_width: 2,
            big_endian: true,
            adjust: 0,
            magic: Some((2, vec![0x00, 0x00])),
        }
    }

    /// Omron FINS/TCP: `FINS` magic, big-endian 4-byte length counting
    /// everything after the length field.
    pub fn fins_tcp() -> Self {
        Self {
            header_len: 8,
            length_offset: 4,
            length_width: 4,
            big_endian: true,
            adjust: 0,
            magic: Some((0, b"FINS".to_vec())),
        }
    }

    /// Mitsubishi MC protocol 3E binary response: subheader `D0 00`,
    /// little-endian response data length at 7.
    pub fn mc_binary() -> Self {
        Self {
            header_len: 9,
            length_offset: 7,
            length_width: 2,
            big_endian: false,
            adjust: 0,
            magic: Some((0, vec![0xD0, 0x00])),
        }
    }

    fn raw_length(&self, header: &[u8]) -> Option<u64> {
        let field = header.get(self.length_offset..self.length_offset + self.length_width)?;
        let value = field.iter().enumerate().fold(0u64, |acc, (i, byte)| {
            let shift = if self.big_endian {
                8 * (self.length_width - 1 - i)
            } else {
                8 * i
            };
            acc | (u64::from(*byte) << shift)
        });
        Some(value)
    }
}

impl FrameHeader for LengthField {
    fn header_len(&self) -> usize {
        self.header_len
    }

    fn is_valid(&self, header: &[u8]) -> bool {
        match &self.magic {
            Some((offset, magic)) => {
                header.get(*offset..*offset + magic.len()) == Some(magic.as_slice())
            }
            None => true,
        }
    }

    fn content_len(&self, header: &[u8]) -> Result<usize> {
        let raw = self.raw_length(header).ok_or_else(|| {
            FrameError::InvalidHeader(format!("header shorter than {} bytes", self.header_len))
        })?;
        let len = i64::try_from(raw)
            .ok()
            .and_then(|raw| raw.checked_add(self.adjust))
            .filter(|len| *len >= 0)
            .ok_or_else(|| {
                FrameError::InvalidHeader(format!(
                    "length field {raw} with adjustment {} is negative",
                    self.adjust
                ))
            })?;
        usize::try_from(len).map_err(|_| FrameError::TooLarge {
            size: usize::MAX,
            max: usize::MAX,
        })
    }
}

/// Framer for protocols that end every frame with a 1-2 byte terminator,
/// optionally followed by a fixed number of trailer bytes (a checksum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimited {
    terminator: Vec<u8>,
    trailer_len: usize,
    max_frame_size: usize,
}

impl Delimited {
    pub fn new(terminator: &[u8]) -> Result<Self> {
        if terminator.is_empty() || terminator.len() > 2 {
            return Err(FrameError::Config(format!(
                "terminator must be 1 or 2 bytes, got {}",
                terminator.len()
            )));
        }
        Ok(Self {
            terminator: terminator.to_vec(),
            trailer_len: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        })
    }

    pub fn crlf() -> Self {
        Self::fixed(b"\r\n", 0)
    }

    pub fn cr() -> Self {
        Self::fixed(b"\r", 0)
    }

    pub fn lf() -> Self {
        Self::fixed(b"\n", 0)
    }

    /// ETX followed by `checksum_len` checksum bytes.
    pub fn etx(checksum_len: usize) -> Self {
        Self::fixed(&[ETX], checksum_len)
    }

    fn fixed(terminator: &[u8], trailer_len: usize) -> Self {
        Self {
            terminator: terminator.to_vec(),
            trailer_len,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_trailer(mut self, trailer_len: usize) -> Self {
        self.trailer_len = trailer_len;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    fn find_terminator(&self, src: &[u8]) -> Option<usize> {
        src.windows(self.terminator.len())
            .position(|window| window == self.terminator.as_slice())
    }
}

impl Framer for Delimited {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(pos) = self.find_terminator(src) else {
            if src.len() > self.max_frame_size {
                return Err(FrameError::TooLarge {
                    size: src.len(),
                    max: self.max_frame_size,
                });
            }
            return Ok(None);
        };

        let end = pos + self.terminator.len() + self.trailer_len;
        if end > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: end,
                max: self.max_frame_size,
            });
        }
        if src.len() < end {
            return Ok(None);
        }
        Ok(Some(Frame::unheaded(src.split_to(end).freeze())))
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}
