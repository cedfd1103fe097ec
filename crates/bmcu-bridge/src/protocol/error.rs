//! Bridge errors

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::RequestId;

/// Errors that can occur while talking to the feeder
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Port-level failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No port open
    #[error("Not connected to BMCU")]
    NotConnected,

    /// Opening the port failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connect called on an open link
    #[error("Already connected")]
    AlreadyConnected,

    /// Command missing from the allowlist
    #[error("Command not in allowlist: {0}")]
    CommandNotAllowed(String),

    /// Blank command name
    #[error("Command name is empty")]
    EmptyCommand,

    /// No reply arrived before the deadline
    #[error("No reply within {waited:.2?} (id={id})")]
    Timeout {
        /// Request that went unanswered
        id: RequestId,
        /// How long the caller waited
        waited: Duration,
    },

    /// Inbound line grew past the limit
    #[error("Line buffer overflow: {0} bytes without a terminator")]
    BufferOverflow(usize),

    /// Bad configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BridgeError {
    /// True for the outcomes `send` reports as "not accepted"
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BridgeError::NotConnected
                | BridgeError::CommandNotAllowed(_)
                | BridgeError::EmptyCommand
        )
    }
}

impl From<serialport::Error> for BridgeError {
    fn from(e: serialport::Error) -> Self {
        BridgeError::SerialError(e.to_string())
    }
}
