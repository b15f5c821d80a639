#![allow(dead_code)]

//! Loopback mock devices shared by the integration tests.
//!
//! Two wire protocols over one byte-addressed memory:
//! - MBAP-framed binary (`00 01 00 00 <len> | unit fc addr count [data]`)
//! - ASCII lines (`RD addr n` / `WR addr HEX`, CRLF terminated)

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use fieldlink::engine::{ByteOrder, Codec, EngineError, Result};
use fieldlink::frame::Frame;
use parking_lot::Mutex;

pub const MEMORY_SIZE: usize = 1024;

/// Address the line device never answers.
pub const SILENT_ADDRESS: usize = 999;

const FC_READ: u8 = 0x03;
const FC_WRITE: u8 = 0x10;
const EX_ILLEGAL_ADDRESS: u8 = 0x02;

/// Byte memory behind every mock device.
#[derive(Clone)]
pub struct Memory(Arc<Mutex<Vec<u8>>>);

impl Memory {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(vec![0; MEMORY_SIZE])))
    }

    fn read(&self, addr: usize, len: usize) -> Option<Vec<u8>> {
        self.0.lock().get(addr..addr.checked_add(len)?).map(<[u8]>::to_vec)
    }

    fn write(&self, addr: usize, data: &[u8]) -> bool {
        let mut memory = self.0.lock();
        match addr
            .checked_add(data.len())
            .and_then(|end| memory.get_mut(addr..end))
        {
            Some(slot) => {
                slot.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

/// Knobs and counters of a running mock device.
#[derive(Clone, Default)]
pub struct Behavior {
    /// Pause before every response.
    pub delay: Duration,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub connections: Arc<AtomicUsize>,
}

impl Behavior {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn begin(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answer one ASCII request line. `None` means stay silent.
pub fn answer_line(memory: &Memory, line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let addr: usize = parts.next().and_then(|a| a.parse().ok()).unwrap_or(usize::MAX);
    if addr == SILENT_ADDRESS {
        return None;
    }
    let reply = match command {
        "RD" => {
            let len = parts.next().and_then(|n| n.parse().ok()).unwrap_or(0);
            match memory.read(addr, len) {
                Some(data) => format!("OK {}\r\n", hex::encode_upper(&data)),
                None => "ER 1 bad address\r\n".to_string(),
            }
        }
        "WR" => match parts.next().and_then(|payload| hex::decode(payload).ok()) {
            Some(data) if memory.write(addr, &data) => "OK\r\n".to_string(),
            Some(_) => "ER 1 bad address\r\n".to_string(),
            None => "ER 2 bad data\r\n".to_string(),
        },
        _ => "ER 9 unknown command\r\n".to_string(),
    };
    Some(reply)
}

/// Answer one MBAP-framed request (header included).
pub fn answer_mbap(memory: &Memory, request: &[u8]) -> Vec<u8> {
    let tid = [request[0], request[1]];
    let unit = request[6];
    let fc = request[7];
    let addr = usize::from(u16::from_be_bytes([request[8], request[9]]));
    let count = usize::from(u16::from_be_bytes([request[10], request[11]]));

    let pdu = match fc {
        FC_READ => match memory.read(addr, count) {
            Some(data) => {
                let mut pdu = vec![FC_READ, data.len() as u8];
                pdu.extend_from_slice(&data);
                pdu
            }
            None => vec![FC_READ | 0x80, EX_ILLEGAL_ADDRESS],
        },
        FC_WRITE if memory.write(addr, &request[12..]) => request[7..12].to_vec(),
        _ => vec![fc | 0x80, EX_ILLEGAL_ADDRESS],
    };

    let mut out = Vec::with_capacity(7 + pdu.len());
    out.extend_from_slice(&tid);
    out.extend_from_slice(&[0x00, 0x00]);
    out.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    out.push(unit);
    out.extend_from_slice(&pdu);
    out
}

/// Blocking TCP device speaking the line protocol, one thread per connection.
pub fn spawn_line_device(memory: Memory, behavior: Behavior) -> SocketAddr {
    spawn_device(move |stream| serve_lines(stream, &memory, &behavior))
}

/// Blocking TCP device speaking the MBAP-framed protocol.
pub fn spawn_mbap_device(memory: Memory, behavior: Behavior) -> SocketAddr {
    spawn_device(move |stream| serve_mbap(stream, &memory, &behavior))
}

fn spawn_device<F>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) + Clone + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("mock device should bind");
    let addr = listener.local_addr().expect("mock device should have an address");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let handler = handler.clone();
            thread::spawn(move || handler(stream));
        }
    });
    addr
}

fn serve_lines(stream: TcpStream, memory: &Memory, behavior: &Behavior) {
    behavior.connections.fetch_add(1, Ordering::SeqCst);
    let mut writer = stream.try_clone().expect("stream should clone");
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        behavior.begin();
        let reply = answer_line(memory, line.trim_end());
        behavior.end();
        if let Some(reply) = reply {
            if writer.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
    }
}

fn serve_mbap(mut stream: TcpStream, memory: &Memory, behavior: &Behavior) {
    behavior.connections.fetch_add(1, Ordering::SeqCst);
    loop {
        let mut header = [0u8; 6];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let len = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut request = header.to_vec();
        request.resize(6 + len, 0);
        if stream.read_exact(&mut request[6..]).is_err() {
            return;
        }
        behavior.begin();
        let reply = answer_mbap(memory, &request);
        behavior.end();
        if stream.write_all(&reply).is_err() {
            return;
        }
    }
}

/// Client side of the line protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec {
    pub order: ByteOrder,
}

impl LineCodec {
    fn body<'a>(response: &'a Frame) -> Result<&'a str> {
        let text = std::str::from_utf8(&response.content)
            .map_err(|err| EngineError::Decode(err.to_string()))?
            .trim_end();
        if let Some(rest) = text.strip_prefix("ER ") {
            let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
            return Err(EngineError::Protocol {
                code: code.parse().unwrap_or(-1),
                message: message.to_string(),
            });
        }
        text.strip_prefix("OK")
            .map(str::trim)
            .ok_or_else(|| EngineError::Decode(format!("unexpected response {text:?}")))
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
        let body = Self::body(response)?;
        hex::decode(body)
            .map(Bytes::from)
            .map_err(|err| EngineError::Decode(format!("invalid hex {body:?}: {err}")))
    }

    fn build_write(&self, address: &str, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::from(format!("WR {address} {}\r\n", hex::encode_upper(data))))
    }

    fn parse_write(&self, response: &Frame) -> Result<()> {
        Self::body(response).map(|_| ())
    }
}

/// Client side of the MBAP-framed protocol; addresses are decimal byte
/// offsets.
#[derive(Debug, Default)]
pub struct MbapCodec {
    tid: AtomicUsize,
}

impl MbapCodec {
    fn address(address: &str) -> Result<u16> {
        address
            .parse()
            .map_err(|_| EngineError::Config(format!("invalid address {address:?}")))
    }

    fn request(&self, pdu: &[u8]) -> Bytes {
        let tid = self.tid.fetch_add(1, Ordering::Relaxed) as u16;
        let mut out = BytesMut::with_capacity(7 + pdu.len());
        out.put_u16(tid);
        out.put_u16(0);
        out.put_u16((pdu.len() + 1) as u16);
        out.put_u8(1);
        out.put_slice(pdu);
        out.freeze()
    }

    fn pdu(response: &Frame, fc: u8) -> Result<&[u8]> {
        let content = &response.content;
        match content.get(1) {
            Some(&code) if code == fc => Ok(&content[2..]),
            Some(&code) if code == fc | 0x80 => Err(EngineError::Protocol {
                code: content.get(2).copied().map(i32::from).unwrap_or(-1),
                message: "exception response".to_string(),
            }),
            _ => Err(EngineError::Decode("unexpected function code".to_string())),
        }
    }
}

impl Codec for MbapCodec {
    fn build_read(&self, address: &str, length: usize) -> Result<Bytes> {
        let addr = Self::address(address)?;
        let mut pdu = vec![FC_READ];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&(length as u16).to_be_bytes());
        Ok(self.request(&pdu))
    }

    fn parse_read(&self, response: &Frame, _length: usize) -> Result<Bytes> {
        let pdu = Self::pdu(response, FC_READ)?;
        let (count, data) = pdu
            .split_first()
            .ok_or_else(|| EngineError::Decode("missing byte count".to_string()))?;
        if usize::from(*count) != data.len() {
            return Err(EngineError::Decode("byte count mismatch".to_string()));
        }
        Ok(Bytes::copy_from_slice(data))
    }

    fn build_write(&self, address: &str, data: &[u8]) -> Result<Bytes> {
        let addr = Self::address(address)?;
        let mut pdu = vec![FC_WRITE];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&(data.len() as u16).to_be_bytes());
        pdu.extend_from_slice(data);
        Ok(self.request(&pdu))
    }

    fn parse_write(&self, response: &Frame) -> Result<()> {
        Self::pdu(response, FC_WRITE).map(|_| ())
    }
}
