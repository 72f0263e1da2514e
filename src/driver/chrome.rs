//! Chrome driver over chaser-oxide.
//!
//! Each launched session gets its own Chrome process, user-data directory
//! and (when the proxy is authenticated) a local auth relay. Disconnect
//! detection rides on the CDP event handler: when its stream ends, Chrome is
//! gone, and the handle's disconnect channel fires.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chaser_oxide::chaser::ChaserPage;
use chaser_oxide::{Browser, BrowserConfig};
use futures::StreamExt;
use once_cell::sync::Lazy;
use rand::Rng;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::proxy::ProxyRelay;
use super::{BrowserDriver, DriverError, LaunchOptions, SessionHandle};
use async_trait::async_trait;

/// Cached result of probing the installed Chrome binary.
static CHROME_VERSION: Lazy<Option<(u32, String)>> = Lazy::new(detect_chrome_version);

/// Poll interval for element visibility checks
const VISIBILITY_POLL: Duration = Duration::from_millis(250);

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Detect the major Chrome version from the installed binary.
/// Returns (major_version, full_version_string), e.g. (120, "120.0.6099.109").
fn detect_chrome_version() -> Option<(u32, String)> {
    let chrome_path = find_chrome()?;
    let output = std::process::Command::new(&chrome_path)
        .arg("--version")
        .output()
        .ok()?;
    let version_str = String::from_utf8_lossy(&output.stdout);
    // Parse "Google Chrome 120.0.6099.109" or "Chromium 120.0.6099.109"
    let full_ver = version_str
        .split_whitespace()
        .find(|s| s.contains('.'))?
        .trim()
        .to_string();
    let major: u32 = full_ver.split('.').next()?.parse().ok()?;
    info!("Detected Chrome version: {} (major: {})", full_ver, major);
    Some((major, full_ver))
}

/// Driver-level configuration shared by all launched sessions.
#[derive(Debug, Clone, Default)]
pub struct ChromeDriverConfig {
    /// Explicit Chrome/Chromium path; auto-detected when `None`.
    pub chrome_path: Option<String>,
}

/// Production driver launching real Chrome sessions.
pub struct ChromeDriver {
    config: ChromeDriverConfig,
}

impl ChromeDriver {
    pub fn new(config: ChromeDriverConfig) -> Self {
        Self { config }
    }
}

impl Default for ChromeDriver {
    fn default() -> Self {
        Self::new(ChromeDriverConfig::default())
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    type Handle = ChromeHandle;

    async fn launch(&self, options: LaunchOptions) -> Result<ChromeHandle, DriverError> {
        if self.config.chrome_path.is_none() && find_chrome().is_none() {
            return Err(DriverError::LaunchFailed(
                "Chrome not found. Install Google Chrome or Chromium and restart.".to_string(),
            ));
        }

        let data_dir = std::env::temp_dir()
            .join("twitch-viewer-pool")
            .join("sessions")
            .join(Uuid::new_v4().to_string());
        let _ = std::fs::create_dir_all(&data_dir);

        let mut builder = BrowserConfig::builder();

        if options.headless {
            // Modern Chrome requires --headless=new for proper headless
            builder = builder.arg(("headless", "new"));
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = self.config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            debug!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        builder = builder.user_data_dir(&data_dir);

        // Keys must NOT include the "--" prefix; the ArgsBuilder adds it.
        // no-first-run, disable-sync, disable-dev-shm-usage etc. are already
        // in chaser-oxide's DEFAULT_ARGS.
        builder = builder
            .arg("mute-audio")
            .arg("no-sandbox")
            .arg("disable-setuid-sandbox")
            .arg("disable-gpu")
            .arg("disable-accelerated-2d-canvas")
            .arg("disable-infobars")
            .arg("disable-notifications")
            .arg("no-default-browser-check")
            .arg("ignore-certificate-errors")
            .arg(("window-position", "50,50"));

        // Authenticated proxies go through a local relay; Chrome rejects
        // inline credentials in --proxy-server.
        let mut relay: Option<ProxyRelay> = None;
        if let Some(ref proxy) = options.proxy {
            if proxy.has_auth() {
                let mut r = ProxyRelay::new(proxy);
                r.start().await.map_err(|e| {
                    DriverError::LaunchFailed(format!("failed to start proxy relay: {}", e))
                })?;
                let local = r.local_url();
                info!("Session using proxy {} via local relay {}", proxy, local);
                builder = builder.arg(("proxy-server", local.as_str()));
                relay = Some(r);
            } else {
                let direct = proxy.server_url();
                info!("Session using direct proxy {}", direct);
                builder = builder.arg(("proxy-server", direct.as_str()));
            }
        }

        builder = builder.window_size(options.window_width, options.window_height);

        let browser_config = builder
            .build()
            .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

        // When the handler stream ends, Chrome has disconnected or crashed.
        let (disconnect_tx, disconnect_rx) = watch::channel(false);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("browser event: {:?}", event);
            }
            warn!("Chrome disconnected (event handler ended)");
            let _ = disconnect_tx.send(true);
        });

        // Chrome opens with a blank tab; take it as the session page and
        // drop any extras.
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| DriverError::LaunchFailed(e.to_string()))?
            };

            for extra in pages {
                let _ = extra.close().await;
            }

            main_page
        };

        let chaser = ChaserPage::new(page);

        let handle = ChromeHandle {
            browser: Arc::new(RwLock::new(Some(browser))),
            page: Arc::new(RwLock::new(Some(chaser))),
            relay: Arc::new(RwLock::new(relay)),
            disconnect_rx,
            data_dir,
        };

        // Header/UA overrides happen post-launch over CDP; a failure here
        // must not leak the Chrome process.
        if let Err(e) = handle.apply_headers().await {
            handle.close().await;
            return Err(e);
        }

        Ok(handle)
    }
}

/// One live Chrome session.
pub struct ChromeHandle {
    browser: Arc<RwLock<Option<Browser>>>,
    page: Arc<RwLock<Option<ChaserPage>>>,
    relay: Arc<RwLock<Option<ProxyRelay>>>,
    disconnect_rx: watch::Receiver<bool>,
    data_dir: PathBuf,
}

impl ChromeHandle {
    /// Set a realistic user agent and language headers via CDP.
    /// Metadata-level Sec-CH-UA handling is left to Chrome itself; only the
    /// UA string and Accept-Language are overridden.
    async fn apply_headers(&self) -> Result<(), DriverError> {
        use chaser_oxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
        use chaser_oxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};

        let page = self.page.read().await;
        let chaser = page
            .as_ref()
            .ok_or(DriverError::ConnectionLost("No active page".into()))?;

        let full_version = CHROME_VERSION
            .as_ref()
            .map(|(_, full)| full.clone())
            .unwrap_or_else(|| "120.0.6099.109".to_string());

        let user_agent = format!(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            full_version
        );

        let ua_params = SetUserAgentOverrideParams {
            user_agent,
            accept_language: Some("en-US,en;q=0.9".to_string()),
            platform: Some("Linux x86_64".to_string()),
            user_agent_metadata: None,
        };
        chaser
            .raw_page()
            .execute(ua_params)
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set UA override: {}", e)))?;

        let headers_json = serde_json::json!({
            "Accept-Language": "en-US,en;q=0.9",
            "Upgrade-Insecure-Requests": "1"
        });
        chaser
            .raw_page()
            .execute(SetExtraHttpHeadersParams::new(Headers::new(headers_json)))
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set extra headers: {}", e)))?;

        Ok(())
    }

    async fn with_page<T>(
        &self,
        f: impl FnOnce(&ChaserPage) -> T,
    ) -> Result<T, DriverError> {
        let page = self.page.read().await;
        let chaser = page
            .as_ref()
            .ok_or(DriverError::ConnectionLost("No active page".into()))?;
        Ok(f(chaser))
    }

    /// Evaluate a script expected to produce a boolean.
    async fn eval_bool(&self, script: &str) -> Result<bool, DriverError> {
        let page = self.page.read().await;
        let chaser = page
            .as_ref()
            .ok_or(DriverError::ConnectionLost("No active page".into()))?;

        let result = chaser
            .evaluate_stealth(script)
            .await
            .map_err(|e| DriverError::InteractionFailed(e.to_string()))?;

        Ok(result.and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

#[async_trait]
impl SessionHandle for ChromeHandle {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        let page = self.page.read().await;
        let chaser = page
            .as_ref()
            .ok_or(DriverError::ConnectionLost("No active page".into()))?;

        debug!("Navigating to {} (timeout {:?})", url, timeout);
        tokio::time::timeout(timeout, async {
            chaser
                .goto(url)
                .await
                .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;
            chaser
                .raw_page()
                .wait_for_navigation()
                .await
                .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;
            Ok::<(), DriverError>(())
        })
        .await
        .map_err(|_| DriverError::Timeout(format!("navigation to {} timed out", url)))??;

        Ok(())
    }

    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        // Quote the selector as a JS string literal
        let quoted = serde_json::json!(selector).to_string();
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
             return !!el && el.offsetWidth > 0 && el.offsetHeight > 0; }})()",
            quoted
        );

        let deadline = Instant::now() + timeout;
        loop {
            if self.eval_bool(&script).await.unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout(format!(
                    "element '{}' not visible within {:?}",
                    selector, timeout
                )));
            }
            tokio::time::sleep(VISIBILITY_POLL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        // Brief pause before clicking (50-150ms), humans don't click instantly
        let delay = rand::thread_rng().gen_range(50..150);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let element = self
            .with_page(|chaser| chaser.raw_page().clone())
            .await?
            .find_element(selector)
            .await
            .map_err(|e| DriverError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .click()
            .await
            .map_err(|e| DriverError::InteractionFailed(e.to_string()))?;

        Ok(())
    }

    async fn disconnected(&self) {
        let mut rx = self.disconnect_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender task ended; treat as disconnected
                return;
            }
        }
    }

    async fn close(&self) {
        // 1. Close the page first (stops navigation/JS execution)
        {
            let mut page = self.page.write().await;
            if let Some(chaser) = page.take() {
                let _ = chaser.raw_page().clone().close().await;
            }
        }

        // 2. Graceful browser close, short grace period, then force kill so
        //    no Chrome child processes are left behind
        {
            let mut browser = self.browser.write().await;
            if let Some(mut b) = browser.take() {
                let _ = b.close().await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = b.kill().await;
            }
        }

        // 3. Stop the auth relay after the browser is dead
        {
            let mut relay = self.relay.write().await;
            if let Some(mut r) = relay.take() {
                r.stop().await;
            }
        }

        let _ = std::fs::remove_dir_all(&self.data_dir);
        debug!("Chrome session closed");
    }
}
