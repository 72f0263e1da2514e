//! Twitch Viewer Pool - Standalone Web Server
//!
//! Runs the viewer pool with a web dashboard accessible via browser.
//!
//! Environment variables:
//! - `VIEWERPOOL_WEB_PORT` - Server port (default: 8080)
//! - `VIEWERPOOL_WEB_USER` - Basic auth username (default: "admin")
//! - `VIEWERPOOL_WEB_PASS` - Basic auth password (auth disabled if not set)

use std::sync::Arc;
use anyhow::anyhow;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = viewer_pool::init_logging();

    info!("Starting Twitch Viewer Pool (server mode)");

    if let Some(dir) = viewer_pool::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let port: u16 = std::env::var("VIEWERPOOL_WEB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    // Log auth status
    if std::env::var("VIEWERPOOL_WEB_PASS").map(|p| !p.is_empty()).unwrap_or(false) {
        let user = std::env::var("VIEWERPOOL_WEB_USER").unwrap_or_else(|_| "admin".to_string());
        info!("Basic auth enabled (user: {})", user);
    } else {
        info!("Basic auth disabled (set VIEWERPOOL_WEB_PASS to enable)");
    }

    let state = Arc::new(viewer_pool::AppState::new());

    // No display means Chrome can only run headless
    {
        let mut config = state.config.write().await;
        let has_display = std::env::var("DISPLAY").map(|d| !d.is_empty()).unwrap_or(false);
        if !has_display && !config.headless {
            info!("Server mode: no DISPLAY - forcing headless=true");
            config.headless = true;
            config.save();
        }
    }

    info!("Application state initialized");
    info!("Dashboard: http://0.0.0.0:{}", port);

    // Blocks until shutdown
    viewer_pool::web::start_server(state, port)
        .await
        .map_err(|e| anyhow!("web server failed: {}", e))?;

    Ok(())
}
