//! Line framing
//!
//! Splits the raw serial byte stream into candidate JSON payloads. A line ends
//! at the first `\n` or `\r`, so CRLF, LF and CR terminated devices all work
//! (the empty line between `\r` and `\n` is dropped). Noise around the payload
//! is cut at the outermost brackets, which recovers lines such as
//! `UN{"id":1}` that a freshly reset UART tends to produce.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use super::{BridgeError, MAX_LINE_BYTES};

/// Something the framer produced from a chunk of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A trimmed, non-empty line candidate
    Line(String),
    /// The accumulation buffer grew past the limit and was discarded
    Overflow(usize),
}

/// Stateless line splitter; the buffer lives with the caller
#[derive(Debug, Default, Clone, Copy)]
pub struct LineFramer;

impl Decoder for LineFramer {
    type Item = String;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(idx) = src.iter().position(|&b| b == b'\n' || b == b'\r') else {
                if src.len() > MAX_LINE_BYTES {
                    let dropped = src.len();
                    src.clear();
                    return Err(BridgeError::BufferOverflow(dropped));
                }
                return Ok(None);
            };

            let raw = src.split_to(idx);
            src.advance(1);

            let text = String::from_utf8_lossy(&raw);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(trim_to_brackets(line).to_string()));
        }
    }
}

/// Accumulating framer used by the read path
#[derive(Debug, Default)]
pub struct Framer {
    buf: BytesMut,
    lines: LineFramer,
}

impl Framer {
    /// Empty framer
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_LINE_BYTES),
            lines: LineFramer,
        }
    }

    /// Append a chunk and drain every complete line out of the buffer
    pub fn feed(&mut self, data: &[u8]) -> Vec<FrameEvent> {
        self.buf.extend_from_slice(data);

        let mut events = Vec::new();
        loop {
            match self.lines.decode(&mut self.buf) {
                Ok(Some(line)) => events.push(FrameEvent::Line(line)),
                Ok(None) => break,
                Err(BridgeError::BufferOverflow(n)) => {
                    events.push(FrameEvent::Overflow(n));
                    break;
                }
                Err(e) => {
                    // LineFramer only fails with BufferOverflow
                    tracing::error!("BMCU: framer error: {e}");
                    self.buf.clear();
                    break;
                }
            }
        }
        events
    }

    /// Bytes held waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial line
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Cut everything before the first `{`/`[` and after the last `}`/`]`.
/// Lines without brackets are returned untouched.
pub fn trim_to_brackets(line: &str) -> &str {
    let mut out = line;
    if let Some(start) = out.find(['{', '[']) {
        out = &out[start..];
    }
    if let Some(end) = out.rfind(['}', ']']) {
        out = &out[..=end];
    }
    out
}
