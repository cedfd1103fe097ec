//! Serial Protocol Communication
//!
//! Line-delimited JSON over a USB serial link to the BMCU feeder.
//!
//! Outbound packets are compact JSON objects `{"id":..,"cmd":..,"args":{..}}`
//! followed by the configured line terminator. Inbound bytes are split on
//! `\n` or `\r`, trimmed down to the outermost `{...}` / `[...]` span and
//! decoded; anything that fails to parse is dropped.

pub mod backoff;
pub mod codec;
pub mod commands;
mod connection;
mod error;
pub mod framer;
#[cfg(test)]
pub(crate) mod mock;
pub mod serial;
pub mod stream;

pub use backoff::Backoff;
pub use codec::{DecodeError, Packet, PacketCodec};
pub use commands::Command;
pub use connection::{drain_input, Connection, ConnectionState, LinkCounters};
pub use error::BridgeError;
pub use framer::{trim_to_brackets, FrameEvent, Framer, LineFramer};
pub use serial::{list_ports, open_port, PortInfo, SerialOpener};
pub use stream::{Link, PortOpener, SerialLink};

/// Default baud rate for the feeder's USB bridge
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Largest inbound line kept without a terminator
pub const MAX_LINE_BYTES: usize = 4096;

/// Bytes requested per read
pub const READ_CHUNK: usize = 4096;
