//! Request ids, allowlist checks and inbound packet bookkeeping
//!
//! Every decoded inbound value lands here. Objects carrying an `id` are kept
//! in a bounded reply cache so callers can pick up their reply later; an
//! object carrying `lanes` replaces the cached lane snapshot; a
//! `{"event":"STARTUP"}` notice asks the bridge for one STATUS refresh per
//! connection.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde_json::{Map, Value};

use crate::config::AllowList;
use crate::protocol::{BridgeError, Command, Packet};

/// Request id as carried in the `id` field
pub type RequestId = i64;

/// Outbound ids stay below this for firmware compatibility
pub const REQUEST_ID_MODULUS: RequestId = 10_000;

/// Reply cache ceiling
pub const REPLY_CACHE_LIMIT: usize = 50;

/// Entries dropped when the ceiling is exceeded
pub const REPLY_CACHE_EVICT: usize = 10;

/// Time-derived request ids in `0..10000`.
///
/// Based on wall-clock milliseconds, but never repeats the previous raw value:
/// two sends inside the same millisecond get consecutive ids.
#[derive(Debug, Default, Clone)]
pub struct RequestIds {
    last_ms: Option<i64>,
}

impl RequestIds {
    /// Fresh generator; the first id follows the clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id from the wall clock
    pub fn next(&mut self) -> RequestId {
        self.next_at(Utc::now().timestamp_millis())
    }

    /// Next id for a given clock reading in milliseconds
    pub fn next_at(&mut self, now_ms: i64) -> RequestId {
        let ms = match self.last_ms {
            Some(last) if now_ms <= last => last.saturating_add(1),
            _ => now_ms,
        };
        self.last_ms = Some(ms);
        ms.rem_euclid(REQUEST_ID_MODULUS)
    }
}

/// Last reply seen per request id, oldest-first eviction
#[derive(Debug, Default, Clone)]
pub struct ReplyCache {
    entries: HashMap<RequestId, Value>,
    order: VecDeque<RequestId>,
}

impl ReplyCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reply. A repeated id overwrites in place and keeps its age.
    pub fn insert(&mut self, id: RequestId, packet: Value) {
        if let Some(slot) = self.entries.get_mut(&id) {
            *slot = packet;
            return;
        }
        self.entries.insert(id, packet);
        self.order.push_back(id);

        if self.entries.len() > REPLY_CACHE_LIMIT {
            for old in self.order.drain(..REPLY_CACHE_EVICT) {
                self.entries.remove(&old);
            }
        }
    }

    /// Cached reply for `id`
    pub fn get(&self, id: RequestId) -> Option<&Value> {
        self.entries.get(&id)
    }

    /// True when a reply for `id` is cached
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of cached replies
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached ids, oldest first
    pub fn ids(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.order.iter().copied()
    }
}

/// Integer view of an inbound `id`. Accepts integers, floats (truncated),
/// booleans and numeric strings; anything else does not correlate.
pub fn coerce_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// True for the device's reset notice
pub fn is_startup_event(packet: &Value) -> bool {
    packet.get("event").and_then(Value::as_str) == Some("STARTUP")
}

/// Inbound/outbound bookkeeping for one bridge
#[derive(Debug, Default)]
pub struct Dispatcher {
    allow: AllowList,
    ids: RequestIds,
    replies: ReplyCache,
    lanes: Option<Value>,
    last_rx: Option<Value>,
    startup_status_sent: bool,
    rx_packets: u64,
}

impl Dispatcher {
    /// Dispatcher enforcing `allow` on outbound commands
    pub fn new(allow: AllowList) -> Self {
        Self {
            allow,
            ..Self::default()
        }
    }

    /// Outbound command allowlist
    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    /// Validate a command and stamp it with a fresh id
    pub fn prepare(&mut self, cmd: &str, args: Map<String, Value>) -> Result<Packet, BridgeError> {
        if cmd.trim().is_empty() {
            return Err(BridgeError::EmptyCommand);
        }
        if !self.allow.allows(cmd) {
            return Err(BridgeError::CommandNotAllowed(cmd.to_string()));
        }
        Ok(Packet::new(self.ids.next(), cmd, args))
    }

    /// A new connection epoch starts; the next STARTUP may trigger STATUS again
    pub fn on_connect(&mut self) {
        self.startup_status_sent = false;
    }

    /// Record an inbound value. Returns a command the bridge should send in response.
    pub fn on_decoded(&mut self, packet: Value) -> Option<Command> {
        self.rx_packets += 1;
        self.last_rx = Some(packet.clone());

        let Value::Object(obj) = &packet else {
            return None;
        };

        if is_startup_event(&packet) {
            if self.startup_status_sent {
                return None;
            }
            self.startup_status_sent = true;
            return Some(Command::Status);
        }

        if let Some(id) = obj.get("id").and_then(coerce_id) {
            self.replies.insert(id, packet.clone());
        }

        if let Some(lanes) = obj.get("lanes") {
            self.lanes = Some(lanes.clone());
        }

        None
    }

    /// Cached reply for `id`
    pub fn reply(&self, id: RequestId) -> Option<&Value> {
        self.replies.get(id)
    }

    /// The whole reply cache
    pub fn replies(&self) -> &ReplyCache {
        &self.replies
    }

    /// Last lane snapshot; empty until one arrives or if it was not a list
    pub fn lanes(&self) -> &[Value] {
        match &self.lanes {
            Some(Value::Array(lanes)) => lanes,
            _ => &[],
        }
    }

    /// True once any `lanes` value has arrived
    pub fn has_snapshot(&self) -> bool {
        self.lanes.is_some()
    }

    /// Most recent decoded inbound value
    pub fn last_rx(&self) -> Option<&Value> {
        self.last_rx.as_ref()
    }

    /// True once this epoch has answered a STARTUP
    pub fn startup_status_sent(&self) -> bool {
        self.startup_status_sent
    }

    /// Decoded inbound values so far
    pub fn rx_packets(&self) -> u64 {
        self.rx_packets
    }
}
