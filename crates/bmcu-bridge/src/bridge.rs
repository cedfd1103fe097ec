//! Bridge context
//!
//! [`Bridge`] owns everything one feeder link needs: the connection, the
//! reconnect backoff, the line buffer, the codec and the dispatcher. It does no
//! scheduling of its own. The two timer handlers take the current instant and
//! return how long to wait before they should run again; see
//! [`crate::scheduler`] for the tokio driver.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::BridgeConfig;
use crate::dispatch::{Dispatcher, RequestId};
use crate::protocol::{
    Backoff, BridgeError, Command, Connection, ConnectionState, FrameEvent, Framer, LinkCounters,
    PacketCodec, PortOpener, SerialOpener, READ_CHUNK,
};

/// Shortest gap between poll ticks while disconnected
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest gap between read ticks while disconnected
pub const MIN_IDLE_READ_INTERVAL: Duration = Duration::from_millis(100);

/// Time spent draining replies after a half-duplex heartbeat
pub const PUMP_BUDGET: Duration = Duration::from_millis(50);

/// Longest RX line echoed to the log in debug mode
const MAX_TRACE_LINE: usize = 300;

/// Point-in-time view of the bridge for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStatus {
    /// Link state
    pub state: ConnectionState,
    /// Last lane snapshot, empty until the device sends one
    pub lanes: Vec<Value>,
    /// Most recent decoded inbound value
    pub last_rx: Option<Value>,
    /// Traffic counters
    pub counters: LinkCounters,
    /// Current reconnect delay
    pub backoff: Duration,
}

/// One feeder link and its protocol state
pub struct Bridge {
    config: BridgeConfig,
    conn: Connection,
    backoff: Backoff,
    framer: Framer,
    codec: PacketCodec,
    dispatcher: Dispatcher,
}

impl Bridge {
    /// Bridge over a real serial port (not yet connected)
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_opener(config, Box::new(SerialOpener))
    }

    /// Bridge over a custom link factory
    pub fn with_opener(config: BridgeConfig, opener: Box<dyn PortOpener>) -> Self {
        let codec = PacketCodec::new(config.line_ending);
        let dispatcher = Dispatcher::new(config.supported_cmds.clone());
        Self {
            conn: Connection::new(config.clone(), opener),
            config,
            backoff: Backoff::new(),
            framer: Framer::new(),
            codec,
            dispatcher,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Link state
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// True while the port is open
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Reconnect backoff state
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Inbound bookkeeping
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Open the link now, ignoring backoff. Starts a new connection epoch and
    /// resets the backoff to its floor.
    pub fn connect(&mut self) -> Result<(), BridgeError> {
        self.conn.connect()?;
        self.backoff.record_success();
        self.framer.reset();
        self.dispatcher.on_connect();
        Ok(())
    }

    /// Try to connect if the backoff allows it. Returns true when a new link came up.
    pub fn maybe_connect(&mut self, now: Instant) -> bool {
        if self.conn.is_connected() || !self.backoff.ready(now) {
            return false;
        }
        self.backoff.begin_attempt(now);

        match self.connect() {
            Ok(()) => true,
            Err(e) => {
                self.backoff.record_failure();
                if self.config.debug {
                    tracing::warn!(
                        "BMCU: connect failed: {e}; retry in {:?}",
                        self.backoff.delay()
                    );
                }
                false
            }
        }
    }

    /// Close the port; the poll timer will reconnect
    pub fn disconnect(&mut self) {
        self.conn.disconnect();
    }

    /// Host shutdown hook
    pub fn shutdown(&mut self) {
        if self.config.debug && self.conn.is_connected() {
            tracing::info!("BMCU: shutting down link on {}", self.config.serial);
        }
        self.conn.disconnect();
    }

    /// Send a command. Returns the id the reply will carry.
    ///
    /// `NotConnected`, `CommandNotAllowed` and `EmptyCommand` mean the command
    /// never reached the wire. A write failure drops the link and is reported
    /// as `SerialError`.
    pub fn send(&mut self, cmd: &str, args: Map<String, Value>) -> Result<RequestId, BridgeError> {
        self.send_noted(cmd, args, "")
    }

    /// [`Bridge::send`] for a known command
    pub fn send_command(
        &mut self,
        cmd: Command,
        args: Map<String, Value>,
    ) -> Result<RequestId, BridgeError> {
        self.send(cmd.name(), args)
    }

    fn send_noted(
        &mut self,
        cmd: &str,
        args: Map<String, Value>,
        note: &str,
    ) -> Result<RequestId, BridgeError> {
        if !self.conn.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let packet = self.dispatcher.prepare(cmd, args)?;
        let bytes = self.codec.encode_packet(&packet)?;

        if self.config.debug {
            let shown = String::from_utf8_lossy(&bytes);
            let shown = shown.trim_end();
            if note.is_empty() {
                tracing::info!("BMCU TX: {shown}");
            } else {
                tracing::info!("BMCU TX({note}): {shown}");
            }
        }

        self.conn.write(&bytes)?;
        Ok(packet.id)
    }

    /// Cached reply for `id`
    pub fn reply(&self, id: RequestId) -> Option<&Value> {
        self.dispatcher.reply(id)
    }

    /// Last lane snapshot, empty until one arrives
    pub fn lanes(&self) -> &[Value] {
        self.dispatcher.lanes()
    }

    /// Most recent decoded inbound value
    pub fn last_rx(&self) -> Option<&Value> {
        self.dispatcher.last_rx()
    }

    /// Allowlist summary for capability queries
    pub fn capabilities(&self) -> String {
        self.dispatcher.allow_list().describe()
    }

    /// Snapshot for status reporting
    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            state: self.conn.state(),
            lanes: self.lanes().to_vec(),
            last_rx: self.last_rx().cloned(),
            counters: self.conn.counters(),
            backoff: self.backoff.delay(),
        }
    }

    /// Read timer body. Returns the delay until the next read tick.
    pub fn handle_read(&mut self, _now: Instant) -> Duration {
        if !self.conn.is_connected() {
            return self.config.read_interval().max(MIN_IDLE_READ_INTERVAL);
        }

        match self.conn.read(READ_CHUNK) {
            Ok(data) if !data.is_empty() => self.process_bytes(&data),
            Ok(_) => {}
            Err(e) => {
                tracing::error!("BMCU: read error: {e}");
                self.conn.disconnect();
            }
        }
        self.config.read_interval()
    }

    /// Poll timer body: reconnect when down, heartbeat when up. A tick that
    /// reconnects does not also heartbeat. Returns the delay until the next
    /// poll tick.
    pub fn handle_poll(&mut self, now: Instant) -> Duration {
        if !self.conn.is_connected() {
            if self.maybe_connect(now) {
                return self.config.poll_interval();
            }
            return self
                .backoff
                .remaining(now)
                .min(self.config.poll_interval())
                .max(MIN_RECONNECT_INTERVAL);
        }

        match self.send_noted(Command::Ping.name(), Map::new(), "poll") {
            Ok(_) => {
                if self.config.is_half_duplex() {
                    self.pump_rx(PUMP_BUDGET);
                }
            }
            Err(e) if e.is_rejection() => {
                tracing::debug!("BMCU: heartbeat not sent: {e}");
            }
            Err(e) => {
                tracing::debug!("BMCU: heartbeat failed: {e}");
            }
        }
        self.config.poll_interval()
    }

    /// Drain whatever arrives within `budget` and process it. Read failures
    /// end the pump early and are otherwise ignored.
    pub fn pump_rx(&mut self, budget: Duration) {
        let deadline = std::time::Instant::now() + budget;
        while self.conn.is_connected() && std::time::Instant::now() < deadline {
            match self.conn.read(READ_CHUNK) {
                Ok(data) if !data.is_empty() => self.process_bytes(&data),
                Ok(_) => break,
                Err(e) => {
                    tracing::debug!("BMCU: pump read failed: {e}");
                    break;
                }
            }
        }
    }

    /// Run raw input through framing, decoding and dispatch
    pub fn process_bytes(&mut self, data: &[u8]) {
        for event in self.framer.feed(data) {
            match event {
                FrameEvent::Line(line) => self.process_line(&line),
                FrameEvent::Overflow(n) => {
                    tracing::error!("BMCU: RX buffer overflow ({n} bytes without newline), clearing");
                }
            }
        }
    }

    fn process_line(&mut self, line: &str) {
        if self.config.debug {
            let shown: String = line.chars().take(MAX_TRACE_LINE).collect();
            tracing::info!("BMCU RX: {shown}");
        }

        let packet = match self.codec.decode(line) {
            Ok(packet) => packet,
            Err(e) => {
                if self.config.debug {
                    tracing::warn!("BMCU: dropping line: {e}");
                }
                return;
            }
        };

        if let Some(follow_up) = self.dispatcher.on_decoded(packet) {
            if self.config.debug {
                tracing::info!("BMCU: got STARTUP, requesting {follow_up} once");
            }
            if let Err(e) = self.send_noted(follow_up.name(), Map::new(), "startup_status") {
                tracing::warn!("BMCU: could not request {follow_up} after STARTUP: {e}");
            }
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("serial", &self.config.serial)
            .field("state", &self.conn.state())
            .field("backoff", &self.backoff)
            .field("pending", &self.framer.pending())
            .finish()
    }
}
