//! Typed scalar conversion for register-oriented devices.
//!
//! Devices store multi-byte values in one of four byte/word orders, named
//! after the position of the bytes of `0x41424344` ("ABCD") on the wire:
//!
//! | order | `0x12345678` on the wire |
//! |-------|--------------------------|
//! | ABCD  | `12 34 56 78` |
//! | DCBA  | `78 56 34 12` |
//! | CDAB  | `56 78 12 34` |
//! | BADC  | `34 12 78 56` |
//!
//! Words are 16 bits wide; 64-bit values follow the same pattern over four
//! words.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Byte/word order of multi-byte values on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ByteOrder {
    /// Big-endian.
    #[default]
    Abcd,
    /// Little-endian.
    Dcba,
    /// Big-endian words, least significant word first.
    Cdab,
    /// Little-endian words, most significant word first.
    Badc,
}

impl ByteOrder {
    /// Convert between big-endian and this order, in place.
    ///
    /// Every order is its own inverse, so the same call encodes and decodes.
    pub fn reorder(self, bytes: &mut [u8]) {
        match self {
            Self::Abcd => {}
            Self::Dcba => bytes.reverse(),
            Self::Cdab => {
                bytes.reverse();
                swap_pairs(bytes);
            }
            Self::Badc => swap_pairs(bytes),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abcd => "ABCD",
            Self::Dcba => "DCBA",
            Self::Cdab => "CDAB",
            Self::Badc => "BADC",
        }
    }
}

fn swap_pairs(bytes: &mut [u8]) {
    for pair in bytes.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ByteOrder {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "").as_str() {
            "ABCD" | "BE" => Ok(Self::Abcd),
            "DCBA" | "LE" => Ok(Self::Dcba),
            "CDAB" => Ok(Self::Cdab),
            "BADC" => Ok(Self::Badc),
            other => Err(EngineError::Config(format!("unknown byte order: {other}"))),
        }
    }
}

/// A fixed-width value that can be read from or written to a device.
pub trait Scalar: Copy + Send + Sync + 'static {
    /// Wire size in bytes.
    const SIZE: usize;

    fn from_be_slice(bytes: &[u8]) -> Option<Self>;

    fn to_be_vec(self) -> Vec<u8>;

    /// Decode `bytes` stored in `order`.
    fn decode(bytes: &[u8], order: ByteOrder) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(EngineError::Decode(format!(
                "expected {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut buf = bytes.to_vec();
        order.reorder(&mut buf);
        Self::from_be_slice(&buf)
            .ok_or_else(|| EngineError::Decode(format!("cannot decode {} bytes", Self::SIZE)))
    }

    /// Encode into `order`.
    fn encode(self, order: ByteOrder) -> Vec<u8> {
        let mut buf = self.to_be_vec();
        order.reorder(&mut buf);
        buf
    }
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_be_slice(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_be_bytes)
                }

                fn to_be_vec(self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }
            }
        )*
    };
}

impl_scalar!(u16, i16, u32, i32, u64, i64, f32, f64);

/// Pack booleans LSB-first: bit 0 of byte 0 is `bits[0]`.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        out[i / 8] |= 1 << (i % 8);
    }
    out
}

/// Unpack `count` booleans LSB-first. Missing bytes read as `false`.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes.get(i / 8).is_some_and(|byte| byte & (1 << (i % 8)) != 0))
        .collect()
}
