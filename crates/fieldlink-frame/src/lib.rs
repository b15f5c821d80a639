//! Response framing for field protocols.
//!
//! A [`Framer`] decides where one frame ends in a byte stream. Two families
//! cover nearly every field protocol:
//! - length-prefixed ([`LengthPrefixed`] over a [`FrameHeader`], e.g. [`LengthField`])
//! - delimiter-terminated ([`Delimited`]: CR, LF, CRLF, ETX + checksum)
//!
//! [`FrameReader`] pulls exactly one frame from a blocking link within a
//! deadline; the `async` feature adds a `tokio_util` decoder and an async
//! reader. No partial frames ever reach the caller.

pub mod error;
pub mod frame;
pub mod framer;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod codec;

pub use error::{FrameError, Result};
pub use frame::Frame;
pub use framer::{
    Delimited, FrameHeader, Framer, LengthField, LengthPrefixed, DEFAULT_MAX_FRAME_SIZE, ETX,
};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use codec::{send_async, AsyncFrameReader, FramerCodec};
