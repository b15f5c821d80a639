use bytes::{BufMut, Bytes, BytesMut};

/// One complete protocol frame.
///
/// Length-prefixed framers split the header from the content; delimited
/// framers leave `header` empty and put the whole frame, terminator and
/// trailer included, in `content`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub header: Bytes,
    pub content: Bytes,
    /// The request that produced this response, when returned by a
    /// transaction engine.
    pub sent: Option<Bytes>,
}

impl Frame {
    pub fn new(header: impl Into<Bytes>, content: impl Into<Bytes>) -> Self {
        Self {
            header: header.into(),
            content: content.into(),
            sent: None,
        }
    }

    /// A frame without a separate header.
    pub fn unheaded(content: impl Into<Bytes>) -> Self {
        Self::new(Bytes::new(), content)
    }

    /// Total wire size (header + content).
    pub fn len(&self) -> usize {
        self.header.len() + self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Header and content as they appeared on the wire.
    pub fn to_bytes(&self) -> Bytes {
        if self.header.is_empty() {
            return self.content.clone();
        }
        let mut out = BytesMut::with_capacity(self.len());
        out.put_slice(&self.header);
        out.put_slice(&self.content);
        out.freeze()
    }

    pub fn with_sent(mut self, request: impl Into<Bytes>) -> Self {
        self.sent = Some(request.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bytes_joins_header_and_content() {
        let frame = Frame::new(&b"\x00\x01"[..], &b"abc"[..]);
        assert_eq!(frame.len(), 5);
        assert_eq!(frame.to_bytes().as_ref(), b"\x00\x01abc");
    }

    #[test]
    fn unheaded_frame_is_content_only() {
        let frame = Frame::unheaded(&b"OK\r\n"[..]).with_sent(&b"RD\r\n"[..]);
        assert!(frame.header.is_empty());
        assert_eq!(frame.to_bytes().as_ref(), b"OK\r\n");
        assert_eq!(frame.sent.as_deref(), Some(&b"RD\r\n"[..]));
    }
}
