//! Proxy validation.
//!
//! A candidate proxy is usable when a disposable browser context routed
//! through it can load a known-good reference page within the validation
//! timeout. Validation never errors outward: every failure reduces to
//! `false` plus one diagnostic status event.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, DriverError, LaunchOptions, SessionHandle};
use crate::emitter::{SessionState, StatusEmitter};
use super::ProxyEndpoint;

/// Validator configuration
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Known-good page the proxy must be able to reach.
    pub reference_url: String,
    /// Budget for one whole validation (launch + navigation).
    pub timeout: Duration,
    pub headless: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            reference_url: "https://www.google.com".to_string(),
            timeout: Duration::from_secs(30),
            headless: true,
        }
    }
}

/// Stateless-per-call reachability check for candidate proxies.
///
/// Callers are expected to run candidates strictly sequentially; the
/// validator itself holds no queue.
pub struct ProxyValidator<D: BrowserDriver> {
    driver: Arc<D>,
    emitter: Arc<StatusEmitter>,
    config: ValidatorConfig,
}

impl<D: BrowserDriver> ProxyValidator<D> {
    pub fn new(driver: Arc<D>, emitter: Arc<StatusEmitter>, config: ValidatorConfig) -> Self {
        Self { driver, emitter, config }
    }

    /// Check one candidate. `index` is the candidate's position in the input
    /// list and is only used to correlate the diagnostic event.
    pub async fn validate(&self, index: usize, endpoint: &ProxyEndpoint) -> bool {
        debug!("Validating proxy {} ({})", index, endpoint);
        self.emitter
            .emit_slot(index, &endpoint.to_string(), SessionState::Validating, None);

        match self.check(endpoint).await {
            Ok(()) => {
                info!("Proxy {} working: {}", index, endpoint);
                true
            }
            Err(e) => {
                warn!("Proxy {} failed validation: {} ({})", index, e, endpoint);
                self.emitter.emit_slot(
                    index,
                    &endpoint.to_string(),
                    SessionState::Validating,
                    Some(e.to_string()),
                );
                false
            }
        }
    }

    /// Launch a disposable context through the proxy and load the reference
    /// page. The context is released on every path, including timeout.
    async fn check(&self, endpoint: &ProxyEndpoint) -> Result<(), DriverError> {
        let started = Instant::now();

        let options = LaunchOptions::with_proxy(endpoint.clone()).headless(self.config.headless);
        let handle = tokio::time::timeout(self.config.timeout, self.driver.launch(options))
            .await
            .map_err(|_| DriverError::Timeout("browser launch timed out".into()))??;

        // Navigation gets whatever is left of the budget
        let remaining = self.config.timeout.saturating_sub(started.elapsed());
        let outcome = handle.goto(&self.config.reference_url, remaining).await;

        handle.close().await;
        outcome
    }
}
