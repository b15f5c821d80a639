use std::sync::Arc;
use std::thread;

use fieldlink_frame::{Frame, FrameReader, FrameWriter, Framer};
use fieldlink_transport::{Channel, ChannelOptions, Dial, Link};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Blocking transaction engine: one request, exactly one framed response.
///
/// The engine owns only the framing strategy; the channel brings the link,
/// its lock and its timeouts. A whole transaction runs under the channel
/// lock, so responses on one channel come back in request order while
/// different channels proceed in parallel.
#[derive(Clone)]
pub struct TransactionEngine {
    framer: Arc<dyn Framer>,
}

impl TransactionEngine {
    pub fn new(framer: impl Framer + 'static) -> Self {
        Self {
            framer: Arc::new(framer),
        }
    }

    pub fn from_arc(framer: Arc<dyn Framer>) -> Self {
        Self { framer }
    }

    pub fn framer(&self) -> &dyn Framer {
        self.framer.as_ref()
    }

    /// Send `request` on `channel` and wait for one response frame.
    ///
    /// Transport failures drop the link and set the channel's error flag,
    /// so the next call reconnects. Nothing is retried within the call.
    pub fn transact<D: Dial>(&self, channel: &Channel<D>, request: &[u8]) -> Result<Frame> {
        if request.is_empty() {
            return Err(EngineError::Config("empty request".to_string()));
        }

        let mut guard = channel.enter();
        let options = *channel.options();
        let link = guard.ensure_connected().map_err(EngineError::Connect)?;

        match send_receive(link, self.framer.as_ref(), request, &options) {
            Ok(frame) => {
                debug!(
                    endpoint = %channel.dialer().target(),
                    bytes = frame.len(),
                    "transaction complete"
                );
                if !options.persistent {
                    guard.disconnect();
                }
                Ok(frame)
            }
            Err(err) => {
                guard.mark_broken(&err.to_string());
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for TransactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("max_frame_size", &self.framer.max_frame_size())
            .finish()
    }
}

fn send_receive<L: Link>(
    link: &mut L,
    framer: &dyn Framer,
    request: &[u8],
    options: &ChannelOptions,
) -> Result<Frame> {
    FrameWriter::new(&mut *link)
        .send(request)
        .map_err(EngineError::Send)?;

    if !options.request_delay.is_zero() {
        thread::sleep(options.request_delay);
    }

    let frame = FrameReader::new(&mut *link)
        .read_frame(framer, options.receive_timeout)
        .map_err(EngineError::Receive)?;
    Ok(frame.with_sent(request.to_vec()))
}
