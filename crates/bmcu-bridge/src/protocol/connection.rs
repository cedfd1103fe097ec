//! Connection management
//!
//! Owns the port handle and its lifecycle. Opening is a single synchronous
//! attempt: open, optional DTR/RTS, settle, optional flush + drain, then a
//! short pause before the link is declared up. Only the open itself can fail
//! the attempt; the hygiene steps are best effort.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use super::stream::{Link, PortOpener};
use super::{BridgeError, READ_CHUNK};
use crate::config::BridgeConfig;

/// Pause after the hygiene steps before the link counts as up
const CONNECT_PAUSE: Duration = Duration::from_millis(120);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No port open
    Disconnected,
    /// Inside a connect attempt
    Connecting,
    /// Port open and usable
    Connected,
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkCounters {
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes read
    pub rx_bytes: u64,
    /// Packets written
    pub tx_packets: u64,
    /// Successful opens
    pub connects: u64,
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read and discard input until the link goes quiet or `window` elapses.
/// The link's timeout is forced to zero for the duration and restored after.
pub fn drain_input(port: &mut dyn Link, window: Duration) -> io::Result<usize> {
    let old_timeout = port.timeout();
    port.set_timeout(Duration::ZERO)?;

    let deadline = Instant::now() + window;
    let mut buf = [0u8; READ_CHUNK];
    let mut discarded = 0;
    let result = loop {
        if Instant::now() >= deadline {
            break Ok(discarded);
        }
        match port.read(&mut buf) {
            Ok(0) => break Ok(discarded),
            Ok(n) => discarded += n,
            Err(ref e) if is_idle(e) => break Ok(discarded),
            Err(e) => break Err(e),
        }
    };

    let _ = port.set_timeout(old_timeout);
    result
}

/// Serial link to the feeder
pub struct Connection {
    config: BridgeConfig,
    opener: Box<dyn PortOpener>,
    port: Option<Box<dyn Link>>,
    state: ConnectionState,
    counters: LinkCounters,
}

impl Connection {
    /// Create a new connection (not yet connected)
    pub fn new(config: BridgeConfig, opener: Box<dyn PortOpener>) -> Self {
        Self {
            config,
            opener,
            port: None,
            state: ConnectionState::Disconnected,
            counters: LinkCounters::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while a port is open
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.port.is_some()
    }

    /// Traffic counters since creation
    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    /// Configuration used for opening
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Open the port and run the connect hygiene sequence
    pub fn connect(&mut self) -> Result<(), BridgeError> {
        if self.is_connected() {
            return Err(BridgeError::AlreadyConnected);
        }

        self.state = ConnectionState::Connecting;
        let mut port = match self.opener.open(&self.config) {
            Ok(port) => port,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        self.prepare_port(port.as_mut());

        self.port = Some(port);
        self.state = ConnectionState::Connected;
        self.counters.connects += 1;
        if self.config.debug {
            tracing::info!(
                "BMCU: connected on {} @ {}",
                self.config.serial,
                self.config.baud
            );
        }
        Ok(())
    }

    fn prepare_port(&self, port: &mut dyn Link) {
        let cfg = &self.config;

        if cfg.connect_set_dtr {
            if let Err(e) = port.write_data_terminal_ready(!cfg.connect_dtr_low) {
                tracing::debug!("BMCU: failed to set DTR: {e} (continuing)");
            }
        }
        if cfg.connect_set_rts {
            if let Err(e) = port.write_request_to_send(!cfg.connect_rts_low) {
                tracing::debug!("BMCU: failed to set RTS: {e} (continuing)");
            }
        }
        std::thread::sleep(cfg.dtr_settle());

        if cfg.connect_flush {
            if let Err(e) = port.clear_input_buffer() {
                tracing::debug!("BMCU: failed to clear input buffer: {e}");
            }
            if let Err(e) = port.clear_output_buffer() {
                tracing::debug!("BMCU: failed to clear output buffer: {e}");
            }
            std::thread::sleep(cfg.flush_delay());

            match drain_input(port, cfg.drain_window()) {
                Ok(n) if n > 0 && cfg.debug => {
                    tracing::info!("BMCU: drained {n} stale bytes on connect")
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("BMCU: drain failed: {e}"),
            }
        }

        std::thread::sleep(CONNECT_PAUSE);
    }

    /// Close the port. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(port) = self.port.take() {
            drop(port);
            if self.config.debug {
                tracing::info!("BMCU: disconnected from {}", self.config.serial);
            }
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Read whatever is waiting, up to `budget` bytes. Never waits for data.
    pub fn read(&mut self, budget: usize) -> Result<Vec<u8>, BridgeError> {
        let port = self.port.as_mut().ok_or(BridgeError::NotConnected)?;

        let available = port.bytes_to_read()? as usize;
        if available == 0 || budget == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available.min(budget)];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                self.counters.rx_bytes += n as u64;
                Ok(buf)
            }
            Err(ref e) if is_idle(e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a whole packet. Any failure drops the connection; there is no retry.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let port = self.port.as_mut().ok_or(BridgeError::NotConnected)?;

        // No flush(): serialport's flush is a tcdrain and can stall the loop
        match port.write_all(data) {
            Ok(()) => {
                self.counters.tx_bytes += data.len() as u64;
                self.counters.tx_packets += 1;
                Ok(())
            }
            Err(e) => {
                tracing::error!("BMCU: send error: {e}");
                self.disconnect();
                Err(BridgeError::SerialError(e.to_string()))
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockSerial;

    fn connection(mock: &MockSerial) -> Connection {
        Connection::new(MockSerial::fast_config(), mock.opener())
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mock = MockSerial::new();
        let mut conn = connection(&mock);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect().unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.counters().connects, 1);
        assert!(matches!(conn.connect(), Err(BridgeError::AlreadyConnected)));

        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.read(64), Err(BridgeError::NotConnected)));
    }

    #[test]
    fn test_open_failure_leaves_disconnected() {
        let mock = MockSerial::new();
        mock.state().fail_opens = 1;
        let mut conn = connection(&mock);

        assert!(matches!(conn.connect(), Err(BridgeError::ConnectionFailed(_))));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect().unwrap();
        assert_eq!(mock.state().opens, 2);
    }

    #[test]
    fn test_line_levels_follow_config() {
        let mock = MockSerial::new();
        let mut config = MockSerial::fast_config();
        config.connect_set_dtr = true;
        config.connect_dtr_low = false;
        config.connect_set_rts = true;
        config.connect_rts_low = true;
        let mut conn = Connection::new(config, mock.opener());
        conn.connect().unwrap();

        let state = mock.state();
        assert_eq!(state.dtr, Some(true));
        assert_eq!(state.rts, Some(false));
        assert_eq!(state.input_clears, 1);
        assert_eq!(state.output_clears, 1);
    }

    #[test]
    fn test_hygiene_failures_are_ignored() {
        let mock = MockSerial::new();
        mock.state().fail_dtr = true;
        let mut config = MockSerial::fast_config();
        config.connect_set_dtr = true;
        let mut conn = Connection::new(config, mock.opener());

        conn.connect().unwrap();
        assert!(conn.is_connected());
    }

    #[test]
    fn test_flush_disabled_skips_clears() {
        let mock = MockSerial::new();
        let mut config = MockSerial::fast_config();
        config.connect_flush = false;
        config.connect_set_rts = false;
        let mut conn = Connection::new(config, mock.opener());
        conn.connect().unwrap();

        let state = mock.state();
        assert_eq!(state.input_clears, 0);
        assert_eq!(state.rts, None);
    }

    #[test]
    fn test_read_respects_budget() {
        let mock = MockSerial::new();
        let mut conn = connection(&mock);
        conn.connect().unwrap();

        assert!(conn.read(4096).unwrap().is_empty());

        mock.push_rx(b"0123456789");
        assert_eq!(conn.read(4).unwrap(), b"0123".to_vec());
        assert_eq!(conn.read(4096).unwrap(), b"456789".to_vec());
        assert_eq!(conn.counters().rx_bytes, 10);
    }

    #[test]
    fn test_read_error_propagates() {
        let mock = MockSerial::new();
        let mut conn = connection(&mock);
        conn.connect().unwrap();
        mock.state().fail_reads = true;
        assert!(conn.read(4096).is_err());
    }

    #[test]
    fn test_write_failure_disconnects() {
        let mock = MockSerial::new();
        let mut conn = connection(&mock);
        conn.connect().unwrap();

        conn.write(b"{}\n").unwrap();
        assert_eq!(mock.take_tx(), "{}\n");
        assert_eq!(conn.counters().tx_packets, 1);

        mock.state().fail_writes = true;
        assert!(matches!(conn.write(b"{}\n"), Err(BridgeError::SerialError(_))));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_drain_discards_and_restores_timeout() {
        let mut mock = MockSerial::new();
        mock.state().timeout = Duration::from_millis(100);
        mock.push_rx(&[0xAA; 9000]);

        let n = drain_input(&mut mock, Duration::from_secs(1)).unwrap();
        assert_eq!(n, 9000);
        assert!(mock.state().rx.is_empty());
        assert_eq!(mock.timeout(), Duration::from_millis(100));
    }
}
