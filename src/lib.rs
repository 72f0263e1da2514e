//! Twitch Viewer Pool
//!
//! Maintains a pool of proxied headless browser sessions watching a Twitch
//! channel's player: each working proxy gets one supervised browser that is
//! reconnected automatically when it dies.

pub mod driver;
pub mod emitter;
pub mod pool;
pub mod proxy;
pub mod web;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use driver::{ChromeDriver, ChromeDriverConfig};
use emitter::{StatusEmitter, StatusEvent};
use pool::{PoolConfig, PoolManager, SupervisorConfig, PLAYER_READY_SELECTOR};
use proxy::ValidatorConfig;

/// How many recent status events the web API keeps for polling clients.
const EVENT_BUFFER: usize = 500;

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Twitch channel to watch
    pub channel: String,
    /// Parent domain for the player embed
    pub parent: String,
    /// Proxy candidates, one per line in the UI (`host:port` or full URL)
    pub proxies: Vec<String>,

    pub headless: bool,

    /// Seconds between reconnect attempts
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Consecutive-attempt cap per slot (0 = retry forever)
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,

    /// Known-good page used to validate proxies and warm up sessions
    #[serde(default = "default_reference_url")]
    pub reference_url: String,

    /// Explicit Chrome path; auto-detected when empty
    #[serde(default)]
    pub chrome_path: String,
}

fn default_retry_delay_secs() -> u64 { 5 }
fn default_validation_timeout_secs() -> u64 { 30 }
fn default_navigation_timeout_secs() -> u64 { 30 }
fn default_readiness_timeout_secs() -> u64 { 15 }
fn default_reference_url() -> String { "https://www.google.com".to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            parent: "localhost".to_string(),
            proxies: vec![],
            headless: true,
            retry_delay_secs: default_retry_delay_secs(),
            max_retries: 0,
            validation_timeout_secs: default_validation_timeout_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            reference_url: default_reference_url(),
            chrome_path: String::new(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("twitch-viewer-pool").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("twitch-viewer-pool").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }

    /// Pool-level view of this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            validator: ValidatorConfig {
                reference_url: self.reference_url.clone(),
                timeout: Duration::from_secs(self.validation_timeout_secs),
                headless: self.headless,
            },
            supervisor: SupervisorConfig {
                warmup_url: self.reference_url.clone(),
                ready_selector: PLAYER_READY_SELECTOR.to_string(),
                navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
                readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
                retry_delay: Duration::from_secs(self.retry_delay_secs),
                max_retries: self.max_retries,
                headless: self.headless,
            },
        }
    }
}

/// Application state shared across the app
pub struct AppState {
    /// Viewer pool
    pub pool: Arc<PoolManager<ChromeDriver>>,
    /// Status event source
    pub emitter: Arc<StatusEmitter>,
    /// Recent status events, newest last
    pub events: Arc<parking_lot::Mutex<VecDeque<StatusEvent>>>,
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,
}

impl AppState {
    /// Create new application state with loaded config
    pub fn new() -> Self {
        let saved_config = AppConfig::load();

        let emitter = Arc::new(StatusEmitter::new());
        let driver = Arc::new(ChromeDriver::new(ChromeDriverConfig {
            chrome_path: if saved_config.chrome_path.is_empty() {
                None
            } else {
                Some(saved_config.chrome_path.clone())
            },
        }));
        let pool = Arc::new(PoolManager::new(
            driver,
            emitter.clone(),
            saved_config.pool_config(),
        ));

        // Drain status events into a bounded ring buffer for the web API
        let events = Arc::new(parking_lot::Mutex::new(VecDeque::with_capacity(EVENT_BUFFER)));
        let mut rx = emitter.attach();
        let buffer = events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut buffer = buffer.lock();
                if buffer.len() == EVENT_BUFFER {
                    buffer.pop_front();
                }
                buffer.push_back(event);
            }
        });

        Self {
            pool,
            emitter,
            events,
            config: Arc::new(RwLock::new(saved_config)),
        }
    }

    /// Configure the application with new settings
    pub async fn configure(&self, config: AppConfig) {
        self.pool.set_config(config.pool_config());
        config.save();
        *self.config.write().await = config;
        info!("Application configured");
    }

    /// Start the pool using the stored configuration.
    pub async fn start_pool(&self) -> Result<(), pool::PoolError> {
        let (channel, parent, proxies) = {
            let config = self.config.read().await;
            (config.channel.clone(), config.parent.clone(), config.proxies.clone())
        };
        self.pool.start(&channel, &parent, &proxies).await
    }

    /// Recent status events, oldest first.
    pub fn recent_events(&self) -> Vec<StatusEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "viewer-pool.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
