//! Packet encoding/decoding
//!
//! Outbound packets are `{"id":..,"cmd":..,"args":{..}}` followed by the
//! configured line terminator. Inbound lines are parsed as arbitrary JSON;
//! only objects take part in reply correlation.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::codec::Encoder;

use super::BridgeError;
use crate::config::LineEnding;
use crate::dispatch::RequestId;

/// Longest slice of a bad line kept in errors and logs
const MAX_LOGGED_LINE: usize = 240;

/// A command packet sent to the feeder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Host-assigned request id, echoed back in the reply
    pub id: RequestId,
    /// Command name, e.g. `PING`
    pub cmd: String,
    /// Command arguments, forwarded verbatim
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Packet {
    /// Build a packet
    pub fn new(id: RequestId, cmd: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id,
            cmd: cmd.into(),
            args,
        }
    }
}

/// Inbound decode failures
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Line is not valid JSON
    #[error("malformed JSON line {line:?}: {source}")]
    Malformed {
        /// The offending line, truncated
        line: String,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },
}

/// JSON-per-line codec
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    line_ending: LineEnding,
}

impl PacketCodec {
    /// Codec terminating packets with `line_ending`
    pub fn new(line_ending: LineEnding) -> Self {
        Self { line_ending }
    }

    /// Configured terminator
    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Serialize a packet to wire bytes, terminator included
    pub fn encode_packet(&self, packet: &Packet) -> Result<Vec<u8>, BridgeError> {
        let mut dst = BytesMut::new();
        let mut codec = *self;
        codec.encode(packet, &mut dst)?;
        Ok(dst.to_vec())
    }

    /// Parse one framed line
    pub fn decode(&self, line: &str) -> Result<Value, DecodeError> {
        serde_json::from_str(line.trim()).map_err(|source| DecodeError::Malformed {
            line: line.chars().take(MAX_LOGGED_LINE).collect(),
            source,
        })
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(LineEnding::Lf)
    }
}

impl Encoder<&Packet> for PacketCodec {
    type Error = BridgeError;

    fn encode(&mut self, packet: &Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(packet)?;
        dst.reserve(json.len() + 2);
        dst.put_slice(&json);
        dst.put_slice(self.line_ending.as_str().as_bytes());
        Ok(())
    }
}
