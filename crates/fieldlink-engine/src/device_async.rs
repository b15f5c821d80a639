use std::sync::Arc;

use bytes::Bytes;
use fieldlink_frame::Frame;
use fieldlink_transport::{AsyncChannel, AsyncDial};

use crate::codec::Codec;
use crate::device::{check_len, merge_bits};
use crate::engine_async::AsyncTransactionEngine;
use crate::error::{EngineError, Result};
use crate::scalar::{pack_bits, unpack_bits, Scalar};

macro_rules! typed_access_async {
    ($($read:ident, $write:ident => $ty:ty;)*) => {
        $(
            pub async fn $read(&self, address: &str) -> Result<$ty> {
                self.read_scalar(address).await
            }

            pub async fn $write(&self, address: &str, value: $ty) -> Result<()> {
                self.write_scalar(address, value).await
            }
        )*
    };
}

/// Suspend-style [`crate::Device`] with identical semantics.
pub struct AsyncDevice<D: AsyncDial, C: Codec> {
    channel: Arc<AsyncChannel<D>>,
    engine: AsyncTransactionEngine,
    codec: C,
}

impl<D: AsyncDial, C: Codec> AsyncDevice<D, C> {
    pub fn new(channel: Arc<AsyncChannel<D>>, engine: AsyncTransactionEngine, codec: C) -> Self {
        Self {
            channel,
            engine,
            codec,
        }
    }

    pub fn channel(&self) -> &Arc<AsyncChannel<D>> {
        &self.channel
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn engine(&self) -> &AsyncTransactionEngine {
        &self.engine
    }

    pub fn is_connection_error(&self) -> bool {
        self.channel.is_connection_error()
    }

    pub async fn transact(&self, request: &[u8]) -> Result<Frame> {
        self.engine.transact(&self.channel, request).await
    }

    pub async fn read(&self, address: &str, length: usize) -> Result<Bytes> {
        if length == 0 {
            return Err(EngineError::Config("read length must be positive".to_string()));
        }
        let request = self.codec.build_read(address, length)?;
        let response = self.transact(&request).await?;
        let data = self.codec.parse_read(&response, length)?;
        check_len(data.len(), length)?;
        Ok(data)
    }

    pub async fn write(&self, address: &str, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(EngineError::Config("nothing to write".to_string()));
        }
        let request = self.codec.build_write(address, data)?;
        let response = self.transact(&request).await?;
        self.codec.parse_write(&response)
    }

    pub async fn read_bool(&self, address: &str, count: usize) -> Result<Vec<bool>> {
        if count == 0 {
            return Err(EngineError::Config("bit count must be positive".to_string()));
        }
        if !self.codec.supports_bits() {
            let bytes = self.read(address, count.div_ceil(8)).await?;
            return Ok(unpack_bits(&bytes, count));
        }
        let request = self.codec.build_read_bool(address, count)?;
        let response = self.transact(&request).await?;
        let bits = self.codec.parse_read_bool(&response, count)?;
        check_len(bits.len(), count)?;
        Ok(bits)
    }

    pub async fn write_bool(&self, address: &str, bits: &[bool]) -> Result<()> {
        if bits.is_empty() {
            return Err(EngineError::Config("nothing to write".to_string()));
        }
        if self.codec.supports_bits() {
            let request = self.codec.build_write_bool(address, bits)?;
            let response = self.transact(&request).await?;
            return self.codec.parse_write_bool(&response);
        }
        let packed = if bits.len() % 8 == 0 {
            pack_bits(bits)
        } else {
            let current = self.read(address, bits.len().div_ceil(8)).await?;
            merge_bits(&current, bits)
        };
        self.write(address, &packed).await
    }

    pub async fn read_scalar<T: Scalar>(&self, address: &str) -> Result<T> {
        let bytes = self.read(address, T::SIZE).await?;
        T::decode(&bytes, self.codec.byte_order())
    }

    pub async fn write_scalar<T: Scalar>(&self, address: &str, value: T) -> Result<()> {
        self.write(address, &value.encode(self.codec.byte_order()))
            .await
    }

    typed_access_async! {
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

impl<D: AsyncDial, C: Codec> std::fmt::Debug for AsyncDevice<D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDevice")
            .field("channel", &self.channel)
            .field("byte_order", &self.codec.byte_order())
            .finish()
    }
}
