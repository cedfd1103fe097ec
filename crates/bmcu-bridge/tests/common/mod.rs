//! Scripted serial link shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bmcu_bridge::config::BridgeConfig;
use bmcu_bridge::protocol::{BridgeError, Link, PortOpener};

#[derive(Debug, Default)]
pub struct MockState {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub timeout: Duration,
    pub dtr: Option<bool>,
    pub rts: Option<bool>,
    pub input_clears: u32,
    pub output_clears: u32,
    pub fail_opens: u32,
    pub opens: u32,
    pub fail_writes: bool,
    pub fail_reads: bool,
    pub fail_dtr: bool,
}

/// Shared handle onto the mock's state; clones see the same port
#[derive(Debug, Clone, Default)]
pub struct MockSerial(Arc<Mutex<MockState>>);

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    /// Queue bytes for the bridge to read
    pub fn push_rx(&self, data: &[u8]) {
        self.state().rx.extend(data.iter().copied());
    }

    /// Take everything written so far
    pub fn take_tx(&self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.state().tx)).into_owned()
    }

    /// Written lines decoded as JSON
    pub fn take_tx_packets(&self) -> Vec<serde_json::Value> {
        self.take_tx()
            .split(['\n', '\r'])
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    pub fn opener(&self) -> Box<dyn PortOpener> {
        Box::new(self.clone())
    }

    /// Config with all connect delays zeroed
    pub fn fast_config() -> BridgeConfig {
        let mut config = BridgeConfig::new("/dev/mock0", 115200);
        config.connect_dtr_settle = 0.0;
        config.connect_flush_delay = 0.0;
        config.connect_drain_s = 0.0;
        config
    }
}

impl PortOpener for MockSerial {
    fn open(&self, config: &BridgeConfig) -> Result<Box<dyn Link>, BridgeError> {
        let mut state = self.state();
        state.opens += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(BridgeError::ConnectionFailed(format!(
                "{}: no such device",
                config.serial
            )));
        }
        state.timeout = config.read_timeout();
        Ok(Box::new(self.clone()))
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if state.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        state.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MockSerial {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state().timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.0.lock().unwrap().timeout
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.input_clears += 1;
        state.rx.clear();
        Ok(())
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.state().output_clears += 1;
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.state();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(state.rx.len() as u32)
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_dtr {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "no DTR"));
        }
        state.dtr = Some(level);
        Ok(())
    }

    fn write_request_to_send(&mut self, level: bool) -> io::Result<()> {
        self.state().rts = Some(level);
        Ok(())
    }
}
