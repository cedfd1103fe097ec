//! Bridge configuration
//!
//! Mirrors the `[bmcu]` section keys of the host configuration. Every key
//! except `serial` has a default, and durations are given in seconds.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::protocol::{BridgeError, DEFAULT_BAUD_RATE};

/// Line terminator appended to outbound packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// `\n`
    #[default]
    Lf,
    /// `\r\n`
    CrLf,
    /// `\r`
    Cr,
}

impl LineEnding {
    /// Resolve a configured token such as `LF`, `crlf` or a literal `"\r\n"`
    pub fn normalize(token: &str) -> Self {
        match token.trim().to_uppercase().as_str() {
            "LF" | "\\N" | "N" | "NEWLINE" => return LineEnding::Lf,
            "CRLF" | "\\R\\N" | "RN" | "WINDOWS" => return LineEnding::CrLf,
            "CR" | "\\R" => return LineEnding::Cr,
            _ => {}
        }
        if token.contains("\r\n") {
            LineEnding::CrLf
        } else if token.contains('\n') {
            LineEnding::Lf
        } else if token.contains('\r') {
            LineEnding::Cr
        } else {
            LineEnding::Lf
        }
    }

    /// Terminator bytes as text
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::Cr => "\r",
        }
    }

    /// Canonical token, used when writing a config back out
    pub fn token(&self) -> &'static str {
        match self {
            LineEnding::Lf => "LF",
            LineEnding::CrLf => "CRLF",
            LineEnding::Cr => "CR",
        }
    }
}

impl Serialize for LineEnding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.token())
    }
}

impl<'de> Deserialize<'de> for LineEnding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(LineEnding::normalize(&raw))
    }
}

/// Whether the link may be treated as full duplex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxRxMode {
    /// Send and receive freely
    Full,
    /// Drain replies right after each heartbeat
    #[default]
    HalfDuplex,
}

impl TxRxMode {
    /// Case-insensitive; anything but `halfduplex` means full duplex
    pub fn parse(token: &str) -> Self {
        if token.trim().eq_ignore_ascii_case("halfduplex") {
            TxRxMode::HalfDuplex
        } else {
            TxRxMode::Full
        }
    }
}

impl Serialize for TxRxMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            TxRxMode::Full => "full",
            TxRxMode::HalfDuplex => "halfduplex",
        })
    }
}

impl<'de> Deserialize<'de> for TxRxMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .filter(|s| !s.trim().is_empty())
            .map(|s| TxRxMode::parse(&s))
            .unwrap_or_default())
    }
}

/// Optional set of command names the bridge may send; empty allows everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    /// Parse a comma-separated list, ignoring blanks
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// True when every command is allowed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `cmd` may be sent
    pub fn allows(&self, cmd: &str) -> bool {
        self.0.is_empty() || self.0.contains(cmd)
    }

    /// Allowed names, sorted
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Human-readable capability summary
    pub fn describe(&self) -> String {
        if self.0.is_empty() {
            "all commands allowed (no allowlist)".to_string()
        } else {
            format!(
                "Allowed commands: {}",
                self.iter().collect::<Vec<_>>().join(", ")
            )
        }
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|c| c.as_ref().trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.iter().collect::<Vec<_>>().join(","))
    }
}

impl Serialize for AllowList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AllowList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Csv(String),
            List(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Csv(s)) => AllowList::parse(&s),
            Some(Raw::List(v)) => v.into_iter().collect(),
            None => AllowList::default(),
        })
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial device path, e.g. `/dev/serial/by-id/usb-1a86_USB_Serial-if00-port0`
    pub serial: String,
    /// Baud rate
    pub baud: u32,
    /// Per-call serial read/write timeout (seconds)
    pub timeout: f64,
    /// Heartbeat / reconnect period (seconds)
    pub poll_interval: f64,
    /// Read loop period (seconds)
    pub read_interval: f64,
    /// Verbose TX/RX logging
    pub debug: bool,
    /// Outbound line terminator
    pub line_ending: LineEnding,
    /// Half-duplex drains replies right after each heartbeat
    pub tx_rx_mode: TxRxMode,
    /// Clear port buffers and drain input after opening
    pub connect_flush: bool,
    /// Pause after clearing buffers (seconds)
    pub connect_flush_delay: f64,
    /// How long to discard stale input on connect (seconds)
    pub connect_drain_s: f64,
    /// Drive DTR after opening; `connect_dtr_low` selects the level
    pub connect_set_dtr: bool,
    /// Drive DTR low instead of high
    pub connect_dtr_low: bool,
    /// Pause after setting DTR/RTS (seconds)
    pub connect_dtr_settle: f64,
    /// Drive RTS after opening; `connect_rts_low` selects the level
    pub connect_set_rts: bool,
    /// Drive RTS low instead of high
    pub connect_rts_low: bool,
    /// Commands the bridge may send; empty allows all
    pub supported_cmds: AllowList,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: String::new(),
            baud: DEFAULT_BAUD_RATE,
            timeout: 0.1,
            poll_interval: 10.0,
            read_interval: 0.05,
            debug: false,
            line_ending: LineEnding::Lf,
            tx_rx_mode: TxRxMode::HalfDuplex,
            connect_flush: true,
            connect_flush_delay: 0.2,
            connect_drain_s: 0.2,
            connect_set_dtr: false,
            connect_dtr_low: true,
            connect_dtr_settle: 0.10,
            connect_set_rts: true,
            connect_rts_low: true,
            supported_cmds: AllowList::default(),
        }
    }
}

/// Seconds to Duration; negative and non-finite values become zero
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

impl BridgeConfig {
    /// Config for a port with every other key at its default
    pub fn new(serial: impl Into<String>, baud: u32) -> Self {
        Self {
            serial: serial.into(),
            baud,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reject an empty port name or a zero baud rate
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.serial.trim().is_empty() {
            return Err(BridgeError::Config("'serial' must be set".to_string()));
        }
        if self.baud == 0 {
            return Err(BridgeError::Config("'baud' must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Per-call port timeout
    pub fn read_timeout(&self) -> Duration {
        secs(self.timeout)
    }

    /// Heartbeat period
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval)
    }

    /// Read loop period
    pub fn read_interval(&self) -> Duration {
        secs(self.read_interval)
    }

    /// Pause after clearing buffers
    pub fn flush_delay(&self) -> Duration {
        secs(self.connect_flush_delay)
    }

    /// Stale-input drain window
    pub fn drain_window(&self) -> Duration {
        secs(self.connect_drain_s)
    }

    /// Pause after setting line levels
    pub fn dtr_settle(&self) -> Duration {
        secs(self.connect_dtr_settle)
    }

    /// True in half-duplex mode
    pub fn is_half_duplex(&self) -> bool {
        self.tx_rx_mode == TxRxMode::HalfDuplex
    }
}
