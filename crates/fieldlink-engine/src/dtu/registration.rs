use bytes::{BufMut, Bytes, BytesMut};
use fieldlink_frame::{Delimited, Frame, FrameError, FrameHeader, Framer, LengthPrefixed};

use crate::error::DtuError;

/// Outcome of a registration, used to pick the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// How a connecting device announces itself.
pub trait Registration: Send + Sync + 'static {
    /// Framer for the single registration frame.
    fn framer(&self) -> &dyn Framer;

    /// Extract the claimed identifier.
    fn identify(&self, frame: &Frame) -> Result<String, DtuError>;

    /// Bytes sent back after the trust check, if the protocol has a reply.
    fn reply(&self, _verdict: Verdict) -> Option<Bytes> {
        None
    }
}

const HS_MAGIC: [u8; 4] = [0x48, 0x73, 0x6E, 0x00];
const HS_ID_LEN: usize = 11;
const HS_ACCEPTED: u8 = 0;
const HS_REJECTED: u8 = 2;

/// `48 73 6E 00 <len>` header of the binary handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct HsHeader;

impl FrameHeader for HsHeader {
    fn header_len(&self) -> usize {
        HS_MAGIC.len() + 1
    }

    fn is_valid(&self, header: &[u8]) -> bool {
        header.starts_with(&HS_MAGIC)
    }

    fn content_len(&self, header: &[u8]) -> fieldlink_frame::Result<usize> {
        header
            .get(HS_MAGIC.len())
            .map(|len| usize::from(*len))
            .ok_or_else(|| FrameError::InvalidHeader("handshake header too short".to_string()))
    }
}

/// Binary handshake: an 11-byte NUL-padded identifier after an `Hsn` header,
/// answered with `48 73 6E 00 01 <status>` (0 accepted, 2 rejected).
#[derive(Debug, Clone)]
pub struct HsRegistration {
    framer: LengthPrefixed<HsHeader>,
}

impl HsRegistration {
    pub fn new() -> Self {
        Self {
            framer: LengthPrefixed::new(HsHeader).with_max_frame_size(usize::from(u8::MAX)),
        }
    }

    /// The registration frame a device sends for `id`.
    pub fn frame_for(id: &str) -> Result<Bytes, DtuError> {
        let len = id.len().max(HS_ID_LEN);
        let len = u8::try_from(len)
            .map_err(|_| DtuError::Registration(format!("identifier too long: {len} bytes")))?;
        let mut out = BytesMut::with_capacity(HS_MAGIC.len() + 1 + usize::from(len));
        out.put_slice(&HS_MAGIC);
        out.put_u8(len);
        out.put_slice(id.as_bytes());
        out.put_bytes(0, usize::from(len) - id.len());
        Ok(out.freeze())
    }
}

impl Default for HsRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration for HsRegistration {
    fn framer(&self) -> &dyn Framer {
        &self.framer
    }

    fn identify(&self, frame: &Frame) -> Result<String, DtuError> {
        parse_identifier(&frame.content)
    }

    fn reply(&self, verdict: Verdict) -> Option<Bytes> {
        let status = match verdict {
            Verdict::Accepted => HS_ACCEPTED,
            Verdict::Rejected => HS_REJECTED,
        };
        let mut out = BytesMut::with_capacity(HS_MAGIC.len() + 2);
        out.put_slice(&HS_MAGIC);
        out.put_u8(1);
        out.put_u8(status);
        Some(out.freeze())
    }
}

/// Text handshake: the identifier on one LF or CRLF terminated line.
#[derive(Debug, Clone)]
pub struct LineRegistration {
    framer: Delimited,
}

impl LineRegistration {
    pub fn new() -> Self {
        Self {
            framer: Delimited::lf().with_max_frame_size(256),
        }
    }
}

impl Default for LineRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration for LineRegistration {
    fn framer(&self) -> &dyn Framer {
        &self.framer
    }

    fn identify(&self, frame: &Frame) -> Result<String, DtuError> {
        parse_identifier(&frame.content)
    }
}

/// UTF-8 identifier with NUL padding and surrounding whitespace removed.
fn parse_identifier(raw: &[u8]) -> Result<String, DtuError> {
    let text = std::str::from_utf8(raw)
        .map_err(|err| DtuError::Registration(format!("identifier is not UTF-8: {err}")))?;
    let id = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if id.is_empty() {
        return Err(DtuError::Registration("empty identifier".to_string()));
    }
    Ok(id.to_string())
}
