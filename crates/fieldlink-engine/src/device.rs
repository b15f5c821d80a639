use std::sync::Arc;

use bytes::Bytes;
use fieldlink_frame::Frame;
use fieldlink_transport::{Channel, Dial};

use crate::codec::Codec;
use crate::engine::TransactionEngine;
use crate::error::{EngineError, Result};
use crate::scalar::{pack_bits, unpack_bits, Scalar};

macro_rules! typed_access {
    ($($read:ident, $write:ident => $ty:ty;)*) => {
        $(
            pub fn $read(&self, address: &str) -> Result<$ty> {
                self.read_scalar(address)
            }

            pub fn $write(&self, address: &str, value: $ty) -> Result<()> {
                self.write_scalar(address, value)
            }
        )*
    };
}

/// Blocking driver-facing API: a codec bound to a shared channel.
///
/// Several devices may share one channel (a serial bus with many slaves);
/// their transactions are serialized by the channel lock.
pub struct Device<D: Dial, C: Codec> {
    channel: Arc<Channel<D>>,
    engine: TransactionEngine,
    codec: C,
}

impl<D: Dial, C: Codec> Device<D, C> {
    pub fn new(channel: Arc<Channel<D>>, engine: TransactionEngine, codec: C) -> Self {
        Self {
            channel,
            engine,
            codec,
        }
    }

    pub fn channel(&self) -> &Arc<Channel<D>> {
        &self.channel
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    pub fn is_connection_error(&self) -> bool {
        self.channel.is_connection_error()
    }

    /// Send a raw request and return the raw response frame.
    pub fn transact(&self, request: &[u8]) -> Result<Frame> {
        self.engine.transact(&self.channel, request)
    }

    /// Read `length` bytes starting at `address`.
    pub fn read(&self, address: &str, length: usize) -> Result<Bytes> {
        if length == 0 {
            return Err(EngineError::Config("read length must be positive".to_string()));
        }
        let request = self.codec.build_read(address, length)?;
        let response = self.transact(&request)?;
        let data = self.codec.parse_read(&response, length)?;
        check_len(data.len(), length)?;
        Ok(data)
    }

    pub fn write(&self, address: &str, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(EngineError::Config("nothing to write".to_string()));
        }
        let request = self.codec.build_write(address, data)?;
        let response = self.transact(&request)?;
        self.codec.parse_write(&response)
    }

    /// Read `count` bits starting at `address`.
    ///
    /// Without dedicated bit commands this reads whole bytes and unpacks
    /// them LSB-first.
    pub fn read_bool(&self, address: &str, count: usize) -> Result<Vec<bool>> {
        if count == 0 {
            return Err(EngineError::Config("bit count must be positive".to_string()));
        }
        if !self.codec.supports_bits() {
            let bytes = self.read(address, count.div_ceil(8))?;
            return Ok(unpack_bits(&bytes, count));
        }
        let request = self.codec.build_read_bool(address, count)?;
        let response = self.transact(&request)?;
        let bits = self.codec.parse_read_bool(&response, count)?;
        check_len(bits.len(), count)?;
        Ok(bits)
    }

    /// Write bits starting at `address`.
    ///
    /// Without dedicated bit commands the bits are packed LSB-first and
    /// written as bytes. A partial last byte is merged with its current
    /// value first; that read and the write are separate transactions.
    pub fn write_bool(&self, address: &str, bits: &[bool]) -> Result<()> {
        if bits.is_empty() {
            return Err(EngineError::Config("nothing to write".to_string()));
        }
        if self.codec.supports_bits() {
            let request = self.codec.build_write_bool(address, bits)?;
            let response = self.transact(&request)?;
            return self.codec.parse_write_bool(&response);
        }
        let packed = if bits.len() % 8 == 0 {
            pack_bits(bits)
        } else {
            let current = self.read(address, bits.len().div_ceil(8))?;
            merge_bits(&current, bits)
        };
        self.write(address, &packed)
    }

    pub fn read_scalar<T: Scalar>(&self, address: &str) -> Result<T> {
        let bytes = self.read(address, T::SIZE)?;
        T::decode(&bytes, self.codec.byte_order())
    }

    pub fn write_scalar<T: Scalar>(&self, address: &str, value: T) -> Result<()> {
        self.write(address, &value.encode(self.codec.byte_order()))
    }

    typed_access! {
        read_u16, write_u16 => u16;
        read_i16, write_i16 => i16;
        read_u32, write_u32 => u32;
        read_i32, write_i32 => i32;
        read_u64, write_u64 => u64;
        read_i64, write_i64 => i64;
        read_f32, write_f32 => f32;
        read_f64, write_f64 => f64;
    }
}

impl<D: Dial, C: Codec> std::fmt::Debug for Device<D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("channel", &self.channel)
            .field("byte_order", &self.codec.byte_order())
            .finish()
    }
}

pub(crate) fn check_len(got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(EngineError::Decode(format!(
            "expected {expected} items, got {got}"
        )));
    }
    Ok(())
}

/// Overlay `bits` (LSB-first) on `current`, keeping bits past the end.
pub(crate) fn merge_bits(current: &[u8], bits: &[bool]) -> Vec<u8> {
    let mut out = pack_bits(bits);
    let tail = bits.len() % 8;
    if let (Some(last), Some(existing)) = (out.last_mut(), current.get(bits.len() / 8)) {
        if tail != 0 {
            let keep = !((1u8 << tail) - 1);
            *last |= existing & keep;
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::io::{self, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use fieldlink_frame::Delimited;
    use fieldlink_transport::{ChannelOptions, Link};
    use parking_lot::Mutex;

    use super::*;
    use crate::scalar::ByteOrder;

    /// Byte-addressed memory answering the line protocol
    /// `RD <addr> <n>` / `WR <addr> <hex>` with `OK [hex]` or `ER <code> <text>`.
    #[derive(Default)]
    pub(crate) struct LineMemory {
        cells: Mutex<HashMap<u32, u8>>,
    }

    impl LineMemory {
        pub(crate) fn answer(&self, line: &str) -> String {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let addr = parts.get(1).and_then(|a| a.trim_start_matches('D').parse::<u32>().ok());
            let Some(addr) = addr else {
                return "ER 1 bad address\r\n".to_string();
            };
            let mut cells = self.cells.lock();
            match (parts.first().copied(), parts.get(2)) {
                (Some("RD"), Some(n)) => {
                    let n: u32 = n.parse().unwrap_or(0);
                    let data: Vec<u8> = (addr..addr + n)
                        .map(|a| cells.get(&a).copied().unwrap_or(0))
                        .collect();
                    format!("OK {}\r\n", hex::encode_upper(&data))
                }
                (Some("WR"), Some(payload)) => match hex::decode(payload).ok() {
                    Some(data) => {
                        for (offset, byte) in data.into_iter().enumerate() {
                            cells.insert(addr + offset as u32, byte);
                        }
                        "OK\r\n".to_string()
                    }
                    None => "ER 2 bad data\r\n".to_string(),
                },
                _ => "ER 3 unknown command\r\n".to_string(),
            }
        }
    }

    /// ASCII line codec: addresses look like `D100`.
    pub(crate) struct LineCodec {
        pub(crate) order: ByteOrder,
    }

    impl LineCodec {
        fn check(response: &Frame) -> Result<String> {
            let text = std::str::from_utf8(&response.content)
                .map_err(|err| EngineError::Decode(err.to_string()))?
                .trim_end()
                .to_string();
            if let Some(rest) = text.strip_prefix("ER ") {
                let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
                return Err(EngineError::Protocol {
                    code: code.parse().unwrap_or(-1),
                    message: message.to_string(),
                });
            }
            text.strip_prefix("OK")
                .map(|rest| rest.trim().to_string())
                .ok_or_else(|| EngineError::Decode(format!("unexpected reply {text:?}")))
        }
    }

    impl Codec for LineCodec {
        fn byte_order(&self) -> ByteOrder {
            self.order
        }

        fn build_read(&self, address: &str, length: usize) -> Result<Bytes> {
            Ok(Bytes::from(format!("RD {address} {length}\r\n")))
        }

        fn parse_read(&self, response: &Frame, _length: usize) -> Result<Bytes> {
            let body = Self::check(response)?;
            hex::decode(&body)
                .map(Bytes::from)
                .map_err(|err| EngineError::Decode(format!("bad hex {body:?}: {err}")))
        }

        fn build_write(&self, address: &str, data: &[u8]) -> Result<Bytes> {
            Ok(Bytes::from(format!("WR {address} {}\r\n", hex::encode_upper(data))))
        }

        fn parse_write(&self, response: &Frame) -> Result<()> {
            Self::check(response).map(|_| ())
        }
    }

    pub(crate) struct MemLink {
        memory: Arc<LineMemory>,
        request: Vec<u8>,
        reply: Vec<u8>,
    }

    impl Read for MemLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.reply.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"));
            }
            let n = buf.len().min(self.reply.len());
            buf[..n].copy_from_slice(&self.reply[..n]);
            self.reply.drain(..n);
            Ok(n)
        }
    }

    impl Write for MemLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.request.extend_from_slice(buf);
            while let Some(end) = self.request.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.request.drain(..=end).collect();
                let answer = self.memory.answer(&String::from_utf8_lossy(&line));
                self.reply.extend_from_slice(answer.as_bytes());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for MemLink {
        fn set_read_timeout(
            &mut self,
            _timeout: Option<Duration>,
        ) -> fieldlink_transport::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemDial {
        pub(crate) memory: Arc<LineMemory>,
        pub(crate) dials: AtomicUsize,
    }

    impl Dial for MemDial {
        type Link = MemLink;

        fn dial(&self, _timeout: Duration) -> fieldlink_transport::Result<MemLink> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Ok(MemLink {
                memory: Arc::clone(&self.memory),
                request: Vec::new(),
                reply: Vec::new(),
            })
        }

        fn target(&self) -> String {
            "memory".to_string()
        }
    }

    fn device(order: ByteOrder) -> Device<MemDial, LineCodec> {
        Device::new(
            Arc::new(Channel::new(MemDial::default(), ChannelOptions::default())),
            TransactionEngine::new(Delimited::crlf()),
            LineCodec { order },
        )
    }

    #[test]
    fn write_then_read_round_trip() {
        let device = device(ByteOrder::Abcd);
        device.write("D100", &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let data = device.read("D100", 4).unwrap();
        assert_eq!(data.as_ref(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn typed_scalars_follow_byte_order() {
        let device = device(ByteOrder::Cdab);
        device.write_u32("D10", 0x1234_5678).unwrap();
        assert_eq!(
            device.read("D10", 4).unwrap().as_ref(),
            &[0x56, 0x78, 0x12, 0x34]
        );
        assert_eq!(device.read_u32("D10").unwrap(), 0x1234_5678);

        device.write_f64("D20", -1.25).unwrap();
        assert_eq!(device.read_f64("D20").unwrap(), -1.25);
        device.write_i16("D30", -7).unwrap();
        assert_eq!(device.read_i16("D30").unwrap(), -7);
    }

    #[test]
    fn bits_fall_back_to_packed_bytes() {
        let device = device(ByteOrder::Abcd);
        device.write("D0", &[0xF0]).unwrap();
        device.write_bool("D0", &[true, false, true]).unwrap();
        assert_eq!(device.read("D0", 1).unwrap().as_ref(), &[0xF5]);
        assert_eq!(
            device.read_bool("D0", 4).unwrap(),
            [true, false, true, false]
        );
    }

    #[test]
    fn device_fault_is_protocol_error_and_keeps_link() {
        let device = device(ByteOrder::Abcd);
        device.read("D1", 1).unwrap();
        let err = device.read("XYZ", 2).unwrap_err();
        assert!(matches!(err, EngineError::Protocol { code: 1, .. }));
        assert!(!err.is_connection_error());
        assert!(!device.is_connection_error());
        assert_eq!(
            device.channel().dialer().dials.load(Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn zero_length_is_config_error() {
        let device = device(ByteOrder::Abcd);
        assert!(matches!(
            device.read("D1", 0).unwrap_err(),
            EngineError::Config(_)
        ));
        assert!(matches!(
            device.write_bool("D1", &[]).unwrap_err(),
            EngineError::Config(_)
        ));
    }

    #[test]
    fn merge_keeps_untouched_bits() {
        assert_eq!(merge_bits(&[0xFF], &[false, false]), [0xFC]);
        assert_eq!(merge_bits(&[0x00, 0x80], &[true; 9]), [0xFF, 0x81]);
    }
}
