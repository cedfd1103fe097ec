//! # BMCU Bridge
//!
//! Host-side serial transport for the BMCU multi-lane filament feeder.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Connection management for the feeder's USB serial link (DTR/RTS,
//!   flush and drain on connect, reconnect with backoff)
//! - Junk-tolerant line framing and JSON packet encode/decode
//! - Request/reply correlation through a bounded reply cache
//! - Read and heartbeat timers on a single-threaded tokio `LocalSet`
//! - A cooperative wait-for-reply
//!
//! ## Example
//!
//! ```rust,ignore
//! use bmcu_bridge::prelude::*;
//!
//! let config = BridgeConfig::from_file("bmcu.json")?;
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async move {
//!     let mut bridge = Bridge::new(config);
//!     bridge.connect()?;
//!     let (handle, _timers) = scheduler::spawn(bridge);
//!
//!     let reply = handle.request("STATUS", Default::default(), Duration::from_secs(2)).await?;
//!     println!("lanes: {:?}", handle.lanes());
//!     Ok::<_, BridgeError>(())
//! }).await?;
//! ```

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod protocol;
pub mod scheduler;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::{Bridge, BridgeStatus};
    pub use crate::config::{AllowList, BridgeConfig, LineEnding, TxRxMode};
    pub use crate::dispatch::RequestId;
    pub use crate::protocol::{BridgeError, Command, ConnectionState};
    pub use crate::scheduler::{self, BridgeHandle, Timers};
    pub use std::time::Duration;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
