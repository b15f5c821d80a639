//! Request/response transactions for field-device drivers.
//!
//! - [`TransactionEngine`] / [`AsyncTransactionEngine`]: send one request on a
//!   channel and read exactly one framed response under the channel lock.
//! - [`Device`] / [`AsyncDevice`]: driver-facing reads and writes (bytes,
//!   bits, typed scalars) over a vendor [`Codec`].
//! - [`dtu`] (`async` feature): reverse-connection server binding inbound
//!   device connections to stable channels.

pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod scalar;

#[cfg(feature = "async")]
pub mod device_async;
#[cfg(feature = "async")]
pub mod dtu;
#[cfg(feature = "async")]
pub mod engine_async;

pub use codec::Codec;
pub use device::Device;
pub use engine::TransactionEngine;
pub use error::{EngineError, Result};
pub use scalar::{pack_bits, unpack_bits, ByteOrder, Scalar};

#[cfg(feature = "async")]
pub use device_async::AsyncDevice;
#[cfg(feature = "async")]
pub use dtu::{DtuConfig, DtuDevice, DtuEvent, DtuServer, Session};
#[cfg(feature = "async")]
pub use engine_async::AsyncTransactionEngine;
#[cfg(feature = "async")]
pub use error::DtuError;
