//! Scripted driver for lifecycle tests.
//!
//! Launch and navigation outcomes are keyed by the proxy host, so a test can
//! make `bad.proxy` unreachable while `good.proxy` works. Handles can be
//! disconnected on demand to exercise the recovery path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{BrowserDriver, DriverError, LaunchOptions, SessionHandle};

/// Host label used for direct (proxy-less) launches.
const DIRECT: &str = "direct";

struct HandleControl {
    host: String,
    disconnect_tx: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
}

/// Test driver with per-host scripted failures.
pub struct FakeDriver {
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail_launch: Mutex<HashMap<String, String>>,
    fail_goto: Mutex<HashMap<String, String>>,
    handles: Mutex<Vec<HandleControl>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_launch: Mutex::new(HashMap::new()),
            fail_goto: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Make every launch through the given proxy host fail.
    pub fn fail_launch_for(&self, host: &str, reason: &str) {
        self.fail_launch.lock().insert(host.to_string(), reason.to_string());
    }

    /// Make every navigation on handles launched through the host fail.
    pub fn fail_goto_for(&self, host: &str, reason: &str) {
        self.fail_goto.lock().insert(host.to_string(), reason.to_string());
    }

    /// Clear a scripted launch failure (e.g. a proxy that recovers).
    pub fn heal_launch(&self, host: &str) {
        self.fail_launch.lock().remove(host);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    /// Number of handles launched and not yet closed.
    pub fn live_count(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|control| !control.closed.load(Ordering::Relaxed))
            .count()
    }

    /// Signal a browser disconnect on the most recent live handle for `host`.
    pub fn trigger_disconnect(&self, host: &str) {
        let handles = self.handles.lock();
        if let Some(control) = handles
            .iter()
            .rev()
            .find(|c| c.host == host && !c.closed.load(Ordering::Relaxed))
        {
            let _ = control.disconnect_tx.send(true);
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    type Handle = FakeHandle;

    async fn launch(&self, options: LaunchOptions) -> Result<FakeHandle, DriverError> {
        self.launches.fetch_add(1, Ordering::Relaxed);

        let host = options
            .proxy
            .as_ref()
            .map(|p| p.host.clone())
            .unwrap_or_else(|| DIRECT.to_string());

        if let Some(reason) = self.fail_launch.lock().get(&host) {
            return Err(DriverError::LaunchFailed(reason.clone()));
        }

        let goto_error = self.fail_goto.lock().get(&host).cloned();
        let (disconnect_tx, disconnect_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));

        self.handles.lock().push(HandleControl {
            host: host.clone(),
            disconnect_tx,
            closed: closed.clone(),
        });

        Ok(FakeHandle {
            goto_error,
            closed,
            closes: self.closes.clone(),
            disconnect_rx,
        })
    }
}

pub struct FakeHandle {
    goto_error: Option<String>,
    closed: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    disconnect_rx: watch::Receiver<bool>,
}

#[async_trait]
impl SessionHandle for FakeHandle {
    async fn goto(&self, _url: &str, timeout: Duration) -> Result<(), DriverError> {
        if timeout.is_zero() {
            return Err(DriverError::Timeout("navigation budget exhausted".into()));
        }
        match &self.goto_error {
            Some(reason) => Err(DriverError::NavigationFailed(reason.clone())),
            None => Ok(()),
        }
    }

    async fn wait_for_visible(&self, _selector: &str, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn disconnected(&self) {
        let mut rx = self.disconnect_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without a disconnect: never resolve
                futures::future::pending::<()>().await;
            }
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }
}
