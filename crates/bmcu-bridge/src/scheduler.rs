//! Timer tasks and the caller-facing handle
//!
//! Everything runs on one thread: [`spawn`] puts the bridge behind an
//! `Rc<RefCell<_>>` and starts the read and poll loops as `spawn_local` tasks,
//! so it must be called from inside a [`tokio::task::LocalSet`]. Borrows never
//! cross an `.await`, which keeps callers, timers and waiters from ever
//! overlapping on the bridge state.
//!
//! ```rust,ignore
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(async {
//!         let (handle, _timers) = scheduler::spawn(Bridge::new(config));
//!         let id = handle.send("PING", Map::new())?;
//!         let reply = handle.wait_for_reply(id, Duration::from_secs(2)).await?;
//!         Ok::<_, BridgeError>(reply)
//!     })
//!     .await?;
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::bridge::{Bridge, BridgeStatus};
use crate::dispatch::RequestId;
use crate::protocol::BridgeError;

/// Upper bound on a single wait
pub const MAX_WAIT: Duration = Duration::from_secs(5);

/// Reply cache poll period while waiting
pub const WAIT_POLL: Duration = Duration::from_millis(50);

/// Smallest timer re-arm, so a zero interval still yields
const MIN_TICK: Duration = Duration::from_millis(1);

/// Clamp a caller-supplied timeout in seconds into `[0, 5]`
pub fn clamp_wait(seconds: f64) -> Duration {
    crate::config::secs(seconds).min(MAX_WAIT)
}

/// Shared handle onto a scheduled bridge
#[derive(Clone)]
pub struct BridgeHandle {
    inner: Rc<RefCell<Bridge>>,
}

impl BridgeHandle {
    /// Wrap a bridge without starting timers
    pub fn new(bridge: Bridge) -> Self {
        Self {
            inner: Rc::new(RefCell::new(bridge)),
        }
    }

    /// Run `f` with exclusive access to the bridge
    pub fn with<R>(&self, f: impl FnOnce(&mut Bridge) -> R) -> R {
        f(&mut *self.inner.borrow_mut())
    }

    /// See [`Bridge::send`]
    pub fn send(&self, cmd: &str, args: Map<String, Value>) -> Result<RequestId, BridgeError> {
        self.inner.borrow_mut().send(cmd, args)
    }

    /// Cached reply for `id`
    pub fn reply(&self, id: RequestId) -> Option<Value> {
        self.inner.borrow().reply(id).cloned()
    }

    /// Last lane snapshot
    pub fn lanes(&self) -> Vec<Value> {
        self.inner.borrow().lanes().to_vec()
    }

    /// Snapshot for status reporting
    pub fn status(&self) -> BridgeStatus {
        self.inner.borrow().status()
    }

    /// True while the port is open
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().is_connected()
    }

    /// Close the port
    pub fn shutdown(&self) {
        self.inner.borrow_mut().shutdown();
    }

    /// Wait until a reply with `id` is cached or `timeout` (capped at five
    /// seconds) runs out. Dropping the future abandons the wait; a late reply
    /// stays in the cache until evicted.
    pub async fn wait_for_reply(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let timeout = timeout.min(MAX_WAIT);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(packet) = self.reply(id) {
                return Ok(packet);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout {
                    id,
                    waited: timeout,
                });
            }
            sleep(WAIT_POLL.min(deadline - now)).await;
        }
    }

    /// Send and wait for the matching reply
    pub async fn request(
        &self,
        cmd: &str,
        args: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let id = self.send(cmd, args)?;
        self.wait_for_reply(id, timeout).await
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(bridge) => f.debug_tuple("BridgeHandle").field(&*bridge).finish(),
            Err(_) => f.write_str("BridgeHandle(<busy>)"),
        }
    }
}

/// Running timer tasks. Dropping this stops them.
#[derive(Debug)]
pub struct Timers {
    read: JoinHandle<()>,
    poll: JoinHandle<()>,
}

impl Timers {
    /// Stop both loops
    pub fn abort(&self) {
        self.read.abort();
        self.poll.abort();
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Start the read and poll loops for `bridge`. Must be called inside a `LocalSet`.
///
/// The first read tick fires after one read interval and the first poll tick
/// (and so the first connect attempt) after one poll interval, unless the
/// bridge was already connected by the caller.
pub fn spawn(bridge: Bridge) -> (BridgeHandle, Timers) {
    let handle = BridgeHandle::new(bridge);
    let timers = spawn_timers(&handle);
    (handle, timers)
}

/// Start timers for an existing handle
pub fn spawn_timers(handle: &BridgeHandle) -> Timers {
    let (first_read, first_poll) = handle.with(|b| {
        (b.config().read_interval(), b.config().poll_interval())
    });

    let read = {
        let bridge = Rc::clone(&handle.inner);
        tokio::task::spawn_local(async move {
            sleep(first_read.max(MIN_TICK)).await;
            loop {
                let next = bridge.borrow_mut().handle_read(Instant::now());
                sleep(next.max(MIN_TICK)).await;
            }
        })
    };

    let poll = {
        let bridge = Rc::clone(&handle.inner);
        tokio::task::spawn_local(async move {
            sleep(first_poll.max(MIN_TICK)).await;
            loop {
                let next = bridge.borrow_mut().handle_poll(Instant::now());
                sleep(next.max(MIN_TICK)).await;
            }
        })
    };

    Timers { read, poll }
}
