//! Per-slot session supervisor.
//!
//! One supervisor owns one viewer slot end to end: it acquires a browser
//! handle through the slot's fixed proxy, opens the player, and keeps the
//! session alive, reconnecting after disconnects until told to stop. All
//! transitions for a slot happen on its single task, so they are serialized
//! by construction.

use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::driver::{BrowserDriver, DriverError, LaunchOptions, SessionHandle};
use crate::emitter::{SessionState, StatusEmitter};
use crate::proxy::ProxyEndpoint;

/// The player control whose visibility means the stream is ready.
pub const PLAYER_READY_SELECTOR: &str = r#"button[data-a-target="player-play-pause-button"]"#;

/// How long a stop request waits for an in-flight launch to settle before
/// abandoning it.
const HANDLE_SETTLE: Duration = Duration::from_secs(5);

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Neutral page visited before the player, warming up the proxy path.
    pub warmup_url: String,
    /// Selector that must become visible (and is then clicked) on startup.
    pub ready_selector: String,
    pub navigation_timeout: Duration,
    pub readiness_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub retry_delay: Duration,
    /// Consecutive-attempt cap; 0 = retry forever.
    pub max_retries: u32,
    pub headless: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            warmup_url: "https://www.google.com".to_string(),
            ready_selector: PLAYER_READY_SELECTOR.to_string(),
            navigation_timeout: Duration::from_secs(30),
            readiness_timeout: Duration::from_secs(15),
            retry_delay: Duration::from_secs(5),
            max_retries: 0,
            headless: true,
        }
    }
}

/// Point-in-time view of one slot, for aggregation and the web API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSnapshot {
    pub slot: usize,
    pub proxy: String,
    pub state: SessionState,
    pub last_error: Option<String>,
}

/// Handle to one running slot task.
pub struct SessionSupervisor {
    slot: usize,
    proxy_display: String,
    state_rx: watch::Receiver<SessionState>,
    last_error: Arc<RwLock<Option<String>>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSupervisor {
    /// Start supervising a slot. The task runs until it is stopped or the
    /// retry cap is exhausted.
    pub fn spawn<D: BrowserDriver>(
        slot: usize,
        proxy: ProxyEndpoint,
        target_url: String,
        driver: Arc<D>,
        emitter: Arc<StatusEmitter>,
        config: SupervisorConfig,
    ) -> Self {
        let proxy_display = proxy.to_string();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);
        let last_error = Arc::new(RwLock::new(None));

        let ctx = SlotContext {
            slot,
            proxy,
            proxy_display: proxy_display.clone(),
            target_url,
            driver,
            emitter,
            config,
            state_tx,
            last_error: last_error.clone(),
        };
        let task = tokio::spawn(run_slot(ctx, stop_rx));

        Self {
            slot,
            proxy_display,
            state_rx,
            last_error,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Current state; never blocks.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            slot: self.slot,
            proxy: self.proxy_display.clone(),
            state: self.state(),
            last_error: self.last_error.read().clone(),
        }
    }

    /// Request the slot to stop and wait until the handle is released and
    /// `Stopped` has been emitted. Safe to call more than once.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Slot {} task ended abnormally: {}", self.slot, e);
            }
        }
    }
}

struct SlotContext<D: BrowserDriver> {
    slot: usize,
    proxy: ProxyEndpoint,
    proxy_display: String,
    target_url: String,
    driver: Arc<D>,
    emitter: Arc<StatusEmitter>,
    config: SupervisorConfig,
    state_tx: watch::Sender<SessionState>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl<D: BrowserDriver> SlotContext<D> {
    /// Publish a state change: update the watched state, remember the error,
    /// and emit exactly one status event.
    fn transition(&self, state: SessionState, error: Option<String>) {
        {
            let mut last = self.last_error.write();
            match (&error, state) {
                (Some(e), _) => *last = Some(e.clone()),
                // A clean run or stop clears the sticky error; retry states
                // keep it visible while the slot recovers.
                (None, SessionState::Running | SessionState::Stopped) => *last = None,
                _ => {}
            }
        }
        let _ = self.state_tx.send(state);
        self.emitter.emit_slot(self.slot, &self.proxy_display, state, error);
    }
}

/// Resolves once a stop has been requested. A dropped supervisor handle
/// closes the channel and counts as a stop, so the slot task can never be
/// orphaned with no remaining cancellation path.
async fn wait_stop(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Launch, warm up, open the player and press play. On any failure the
/// handle is released before the error propagates.
async fn connect_once<D: BrowserDriver>(ctx: &SlotContext<D>) -> Result<D::Handle, DriverError> {
    let options = LaunchOptions::with_proxy(ctx.proxy.clone()).headless(ctx.config.headless);
    let handle = ctx.driver.launch(options).await?;

    let setup = async {
        handle.goto(&ctx.config.warmup_url, ctx.config.navigation_timeout).await?;
        handle.goto(&ctx.target_url, ctx.config.navigation_timeout).await?;
        handle
            .wait_for_visible(&ctx.config.ready_selector, ctx.config.readiness_timeout)
            .await?;
        handle.click(&ctx.config.ready_selector).await?;
        Ok::<(), DriverError>(())
    };

    match setup.await {
        Ok(()) => Ok(handle),
        Err(e) => {
            handle.close().await;
            Err(e)
        }
    }
}

async fn run_slot<D: BrowserDriver>(ctx: SlotContext<D>, mut stop_rx: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        if *stop_rx.borrow() {
            ctx.transition(SessionState::Stopped, None);
            return;
        }

        ctx.transition(SessionState::Connecting, None);

        let connect = connect_once(&ctx);
        tokio::pin!(connect);
        let outcome = tokio::select! {
            res = &mut connect => Some(res),
            _ = wait_stop(&mut stop_rx) => None,
        };

        let Some(outcome) = outcome else {
            // Stop arrived mid-connect. Give the launch a moment to settle
            // so the handle can be released; past that the dropped future
            // aborts whatever was in flight.
            if let Ok(Ok(handle)) = tokio::time::timeout(HANDLE_SETTLE, &mut connect).await {
                handle.close().await;
            }
            ctx.transition(SessionState::Stopped, None);
            return;
        };

        match outcome {
            Ok(handle) => {
                attempt = 0;
                info!("Slot {} running via {}", ctx.slot, ctx.proxy_display);
                ctx.transition(SessionState::Running, None);

                let stopped = tokio::select! {
                    _ = handle.disconnected() => false,
                    _ = wait_stop(&mut stop_rx) => true,
                };

                if stopped {
                    handle.close().await;
                    ctx.transition(SessionState::Stopped, None);
                    return;
                }

                warn!("Slot {} browser disconnected", ctx.slot);
                ctx.transition(SessionState::Disconnected, Some("browser disconnected".into()));
                handle.close().await;
                ctx.transition(SessionState::Retrying, None);
            }
            Err(e) => {
                warn!("Slot {} connect failed: {}", ctx.slot, e);
                ctx.transition(SessionState::Retrying, Some(e.to_string()));
            }
        }

        attempt += 1;
        if ctx.config.max_retries > 0 && attempt > ctx.config.max_retries {
            warn!("Slot {} giving up after {} attempts", ctx.slot, attempt);
            ctx.transition(
                SessionState::Failed,
                Some(format!("retry limit reached after {} attempts", attempt)),
            );
            return;
        }

        // Fixed retry delay; a stop request cancels the pending timer
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.retry_delay) => {}
            _ = wait_stop(&mut stop_rx) => {
                ctx.transition(SessionState::Stopped, None);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::emitter::StatusEvent;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn endpoint(host: &str) -> ProxyEndpoint {
        ProxyEndpoint::parse(&format!("http://{}:8080", host)).unwrap()
    }

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            retry_delay: Duration::from_millis(20),
            navigation_timeout: Duration::from_millis(500),
            readiness_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    async fn next_state(rx: &mut UnboundedReceiver<StatusEvent>) -> SessionState {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("emitter closed");
        match event {
            StatusEvent::Slot { state, .. } => state,
            other => panic!("unexpected pool event: {:?}", other),
        }
    }

    fn spawn_slot(
        driver: Arc<FakeDriver>,
        emitter: Arc<StatusEmitter>,
        host: &str,
        config: SupervisorConfig,
    ) -> SessionSupervisor {
        SessionSupervisor::spawn(
            0,
            endpoint(host),
            "https://player.twitch.tv/?channel=streamer1&parent=example.com".to_string(),
            driver,
            emitter,
            config,
        )
    }

    #[tokio::test]
    async fn test_connects_and_runs() {
        let driver = Arc::new(FakeDriver::new());
        let emitter = Arc::new(StatusEmitter::new());
        let mut rx = emitter.attach();

        let supervisor = spawn_slot(driver.clone(), emitter.clone(), "good.proxy", test_config());

        assert_eq!(next_state(&mut rx).await, SessionState::Connecting);
        assert_eq!(next_state(&mut rx).await, SessionState::Running);
        assert_eq!(supervisor.state(), SessionState::Running);
        assert_eq!(driver.live_count(), 1);

        supervisor.stop().await;
        assert_eq!(next_state(&mut rx).await, SessionState::Stopped);
        assert_eq!(supervisor.state(), SessionState::Stopped);
        assert_eq!(driver.live_count(), 0, "handle must be released on stop");
    }

    #[tokio::test]
    async fn test_disconnect_triggers_reconnect() {
        let driver = Arc::new(FakeDriver::new());
        let emitter = Arc::new(StatusEmitter::new());
        let mut rx = emitter.attach();

        let supervisor = spawn_slot(driver.clone(), emitter.clone(), "good.proxy", test_config());

        assert_eq!(next_state(&mut rx).await, SessionState::Connecting);
        assert_eq!(next_state(&mut rx).await, SessionState::Running);

        driver.trigger_disconnect("good.proxy");

        assert_eq!(next_state(&mut rx).await, SessionState::Disconnected);
        assert_eq!(next_state(&mut rx).await, SessionState::Retrying);
        assert_eq!(next_state(&mut rx).await, SessionState::Connecting);
        assert_eq!(next_state(&mut rx).await, SessionState::Running);

        assert_eq!(driver.launch_count(), 2);
        assert_eq!(driver.live_count(), 1, "old handle released before relaunch");

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_retrying_until_recovery() {
        let driver = Arc::new(FakeDriver::new());
        driver.fail_launch_for("flaky.proxy", "connection refused");
        let emitter = Arc::new(StatusEmitter::new());
        let mut rx = emitter.attach();

        let supervisor = spawn_slot(driver.clone(), emitter.clone(), "flaky.proxy", test_config());

        assert_eq!(next_state(&mut rx).await, SessionState::Connecting);
        assert_eq!(next_state(&mut rx).await, SessionState::Retrying);
        assert!(supervisor.snapshot().last_error.unwrap().contains("connection refused"));

        // Proxy comes back; next attempt should succeed
        driver.heal_launch("flaky.proxy");

        loop {
            match next_state(&mut rx).await {
                SessionState::Running => break,
                SessionState::Connecting | SessionState::Retrying => continue,
                other => panic!("unexpected state: {:?}", other),
            }
        }
        assert!(supervisor.snapshot().last_error.is_none(), "error cleared once running");

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_retry_cap_reaches_failed() {
        let driver = Arc::new(FakeDriver::new());
        driver.fail_launch_for("dead.proxy", "no route to host");
        let emitter = Arc::new(StatusEmitter::new());
        let mut rx = emitter.attach();

        let config = SupervisorConfig { max_retries: 2, ..test_config() };
        let supervisor = spawn_slot(driver.clone(), emitter.clone(), "dead.proxy", config);

        loop {
            match next_state(&mut rx).await {
                SessionState::Failed => break,
                SessionState::Connecting | SessionState::Retrying => continue,
                other => panic!("unexpected state: {:?}", other),
            }
        }
        assert_eq!(supervisor.state(), SessionState::Failed);
        // Cap of 2 allows the initial attempt plus up to the cap
        assert!(driver.launch_count() <= 3);

        // Stopping a failed slot is a no-op that must not hang
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_retry_timer() {
        let driver = Arc::new(FakeDriver::new());
        driver.fail_launch_for("dead.proxy", "no route to host");
        let emitter = Arc::new(StatusEmitter::new());
        let mut rx = emitter.attach();

        // Long retry delay: stop must not wait it out
        let config = SupervisorConfig { retry_delay: Duration::from_secs(60), ..test_config() };
        let supervisor = spawn_slot(driver.clone(), emitter.clone(), "dead.proxy", config);

        assert_eq!(next_state(&mut rx).await, SessionState::Connecting);
        assert_eq!(next_state(&mut rx).await, SessionState::Retrying);

        let started = std::time::Instant::now();
        supervisor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5), "stop must cancel the retry timer");
        assert_eq!(next_state(&mut rx).await, SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_supervisor_stops_slot_task() {
        let driver = Arc::new(FakeDriver::new());
        let emitter = Arc::new(StatusEmitter::new());
        let mut rx = emitter.attach();

        let supervisor = spawn_slot(driver.clone(), emitter.clone(), "good.proxy", test_config());
        assert_eq!(next_state(&mut rx).await, SessionState::Connecting);
        assert_eq!(next_state(&mut rx).await, SessionState::Running);

        // Dropping the handle without stop() must still wind the slot down
        drop(supervisor);

        assert_eq!(next_state(&mut rx).await, SessionState::Stopped);
        assert_eq!(driver.live_count(), 0, "orphaned slot must release its handle");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let driver = Arc::new(FakeDriver::new());
        let emitter = Arc::new(StatusEmitter::new());
        let mut rx = emitter.attach();

        let supervisor = spawn_slot(driver.clone(), emitter.clone(), "good.proxy", test_config());
        assert_eq!(next_state(&mut rx).await, SessionState::Connecting);
        assert_eq!(next_state(&mut rx).await, SessionState::Running);

        supervisor.stop().await;
        supervisor.stop().await;

        assert_eq!(next_state(&mut rx).await, SessionState::Stopped);
        assert!(rx.try_recv().is_err(), "exactly one Stopped event");
    }
}
