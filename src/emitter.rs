//! Lifecycle status events and the emitter that delivers them.
//!
//! Every component publishes through a single [`StatusEmitter`]; exactly one
//! observer (attached at a time) receives all events in publish order.
//! Events published with no observer attached are dropped, not queued.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle state of one viewer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Proxy reachability check in progress.
    Validating,
    /// Acquiring a browser handle and navigating to the player.
    Connecting,
    /// Player page is open and playing.
    Running,
    /// Browser reported an async disconnect.
    Disconnected,
    /// Waiting out the retry delay before reconnecting.
    Retrying,
    /// Explicitly stopped; terminal.
    Stopped,
    /// Retry cap exhausted; terminal.
    Failed,
}

/// Pool-level lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoolPhase {
    Validating,
    Started,
    Stopped,
    Failed,
}

/// A single published lifecycle notification.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum StatusEvent {
    /// Per-slot transition. `proxy` is the credential-free display form.
    Slot {
        slot: usize,
        proxy: String,
        state: SessionState,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Pool-wide phase change.
    Pool {
        phase: PoolPhase,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl StatusEvent {
    pub fn slot(slot: usize, proxy: String, state: SessionState, error: Option<String>) -> Self {
        Self::Slot { slot, proxy, state, error, timestamp: Utc::now() }
    }

    pub fn pool(phase: PoolPhase, error: Option<String>) -> Self {
        Self::Pool { phase, error, timestamp: Utc::now() }
    }
}

/// Single-observer status channel.
///
/// Publishing never blocks: the observer side is an unbounded receiver, and
/// with no observer attached events are fire-and-forget.
pub struct StatusEmitter {
    observer: RwLock<Option<mpsc::UnboundedSender<StatusEvent>>>,
}

impl StatusEmitter {
    pub fn new() -> Self {
        Self { observer: RwLock::new(None) }
    }

    /// Attach an observer, replacing any previous one.
    ///
    /// The returned receiver sees every event published from this point on,
    /// in publish order.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<StatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.observer.write() = Some(tx);
        rx
    }

    /// Detach the current observer, if any.
    pub fn detach(&self) {
        *self.observer.write() = None;
    }

    /// Publish an event to the current observer.
    pub fn emit(&self, event: StatusEvent) {
        debug!("status event: {:?}", event);
        let observer = self.observer.read();
        if let Some(tx) = observer.as_ref() {
            // A closed receiver means the observer went away; the event is
            // dropped like any other unobserved event.
            let _ = tx.send(event);
        }
    }

    /// Publish a per-slot transition event.
    pub fn emit_slot(&self, slot: usize, proxy: &str, state: SessionState, error: Option<String>) {
        self.emit(StatusEvent::slot(slot, proxy.to_string(), state, error));
    }

    /// Publish a pool-level phase event.
    pub fn emit_pool(&self, phase: PoolPhase, error: Option<String>) {
        self.emit(StatusEvent::pool(phase, error));
    }
}

impl Default for StatusEmitter {
    fn default() -> Self {
        Self::new()
    }
}
