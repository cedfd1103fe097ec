//! Byte link abstraction
//!
//! [`Link`] is what the connection drives; [`SerialLink`] backs it with a real
//! port and the tests back it with a scripted one.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::BridgeError;
use crate::config::BridgeConfig;

/// Byte link to the feeder. Serial in production, scripted in tests.
pub trait Link: Read + Write + Send {
    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Current read/write timeout
    fn timeout(&self) -> Duration;

    /// Clear input buffers
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Clear output buffers
    fn clear_output_buffer(&mut self) -> io::Result<()>;

    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Drive the DTR line
    fn write_data_terminal_ready(&mut self, level: bool) -> io::Result<()>;

    /// Drive the RTS line
    fn write_request_to_send(&mut self, level: bool) -> io::Result<()>;
}

/// Opens links; swapped out for a mock in tests
pub trait PortOpener {
    /// Open a link for `config`, ready for the connect sequence
    fn open(&self, config: &BridgeConfig) -> Result<Box<dyn Link>, BridgeError>;
}

fn to_io(e: serialport::Error) -> io::Error {
    io::Error::other(e)
}

/// Serial port wrapper implementing Link
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Link for SerialLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(to_io)
    }

    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(to_io)
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(to_io)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(to_io)
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> io::Result<()> {
        self.port.write_data_terminal_ready(level).map_err(to_io)
    }

    fn write_request_to_send(&mut self, level: bool) -> io::Result<()> {
        self.port.write_request_to_send(level).map_err(to_io)
    }
}
