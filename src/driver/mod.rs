//! Browser driver capability.
//!
//! The pool core only depends on these traits; the production implementation
//! drives real Chrome through chaser-oxide, tests script a fake.

mod chrome;

#[cfg(test)]
pub(crate) mod fake;

pub use chrome::{ChromeDriver, ChromeDriverConfig};

use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

use crate::proxy::ProxyEndpoint;

/// Driver-level errors
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Interaction failed: {0}")]
    InteractionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Options for launching one browser-driven session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Proxy the whole session is bound to; `None` for a direct connection.
    pub proxy: Option<ProxyEndpoint>,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            headless: true,
            window_width: 1280,
            window_height: 720,
        }
    }
}

impl LaunchOptions {
    pub fn with_proxy(proxy: ProxyEndpoint) -> Self {
        Self { proxy: Some(proxy), ..Default::default() }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

/// One live automated browsing session.
///
/// Exclusively owned by whoever launched it; `close` must be called on every
/// exit path so no browser process outlives its owner.
#[async_trait]
pub trait SessionHandle: Send + Sync + 'static {
    /// Navigate and wait for the page to settle, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Wait until the element matching `selector` is rendered and visible.
    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Click the element matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Resolves when the underlying browser disconnects or crashes.
    /// Resolves immediately if it already has.
    async fn disconnected(&self);

    /// Tear down the browser and release every associated resource.
    async fn close(&self);
}

/// Launches browser-driven sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync + 'static {
    type Handle: SessionHandle;

    async fn launch(&self, options: LaunchOptions) -> Result<Self::Handle, DriverError>;
}
