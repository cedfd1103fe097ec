//! Protocol commands
//!
//! The commands the BMCU firmware answers. The bridge forwards any command
//! name, so this list is a convenience for callers and for the bridge's own
//! heartbeat and startup traffic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Firmware commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Liveness check, replies with telemetry
    Ping,

    /// Full lane snapshot (`lanes` array)
    Status,

    /// Per-lane presence bits
    GetSensors,

    /// Move an axis (`axis`, `dist_mm`, `speed`)
    Move,

    /// Stop all motion
    Stop,

    /// Select the active lane (`lane`)
    SelectLane,

    /// Toggle auto feed for a lane (`lane`, `enable`)
    SetAutoFeed,

    /// Read filament metadata for a lane (`lane`)
    GetFilamentInfo,

    /// Write filament metadata for a lane
    SetFilamentInfo,
}

impl Command {
    /// Every command the firmware understands
    pub const ALL: [Command; 9] = [
        Command::Ping,
        Command::Status,
        Command::GetSensors,
        Command::Move,
        Command::Stop,
        Command::SelectLane,
        Command::SetAutoFeed,
        Command::GetFilamentInfo,
        Command::SetFilamentInfo,
    ];

    /// Name as it appears in the `cmd` field
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Status => "STATUS",
            Command::GetSensors => "GET_SENSORS",
            Command::Move => "MOVE",
            Command::Stop => "STOP",
            Command::SelectLane => "SELECT_LANE",
            Command::SetAutoFeed => "SET_AUTO_FEED",
            Command::GetFilamentInfo => "GET_FILAMENT_INFO",
            Command::SetFilamentInfo => "SET_FILAMENT_INFO",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        self.name()
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Command::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown BMCU command '{wanted}'"))
    }
}
