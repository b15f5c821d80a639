use bytes::Bytes;
use fieldlink_frame::Frame;

use crate::error::{EngineError, Result};
use crate::scalar::ByteOrder;

/// Vendor addressing and payload logic for one protocol.
///
/// A codec builds request bytes and interprets the framed response; it never
/// touches the link. Device fault codes are reported as
/// [`EngineError::Protocol`], malformed responses as [`EngineError::Decode`].
///
/// Bit access is optional. Codecs without dedicated bit commands leave
/// [`Codec::supports_bits`] at `false` and the device falls back to byte
/// access with LSB-first packing.
pub trait Codec: Send + Sync {
    /// Order of multi-byte values stored on the device.
    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Abcd
    }

    fn build_read(&self, address: &str, length: usize) -> Result<Bytes>;

    /// Extract exactly `length` data bytes from a read response.
    fn parse_read(&self, response: &Frame, length: usize) -> Result<Bytes>;

    fn build_write(&self, address: &str, data: &[u8]) -> Result<Bytes>;

    fn parse_write(&self, response: &Frame) -> Result<()>;

    fn supports_bits(&self) -> bool {
        false
    }

    fn build_read_bool(&self, address: &str, _count: usize) -> Result<Bytes> {
        Err(unsupported_bits(address))
    }

    fn parse_read_bool(&self, _response: &Frame, _count: usize) -> Result<Vec<bool>> {
        Err(EngineError::Config("bit access not supported".to_string()))
    }

    fn build_write_bool(&self, address: &str, _bits: &[bool]) -> Result<Bytes> {
        Err(unsupported_bits(address))
    }

    fn parse_write_bool(&self, _response: &Frame) -> Result<()> {
        Err(EngineError::Config("bit access not supported".to_string()))
    }
}

fn unsupported_bits(address: &str) -> EngineError {
    EngineError::Config(format!("bit access not supported for {address}"))
}
