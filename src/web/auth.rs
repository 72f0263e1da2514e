//! Basic authentication middleware for the web server.
//!
//! Reads credentials from environment variables:
//! - `VIEWERPOOL_WEB_USER` (default: "admin")
//! - `VIEWERPOOL_WEB_PASS` (required for auth to be enabled)

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use base64::Engine;
use tracing::warn;

/// Check an `Authorization` header value against the expected credentials.
/// Only the `Basic` scheme is accepted; the password may contain colons.
fn credentials_match(auth_header: &str, user: &str, pass: &str) -> bool {
    let Some(encoded) = auth_header.strip_prefix("Basic ") else {
        warn!("[Auth] Invalid auth scheme (expected Basic)");
        return false;
    };

    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        warn!("[Auth] Invalid base64 in Authorization header");
        return false;
    };

    let Ok(credentials) = String::from_utf8(decoded) else {
        warn!("[Auth] Invalid UTF-8 in credentials");
        return false;
    };

    // Split "username:password"
    let mut parts = credentials.splitn(2, ':');
    let username = parts.next().unwrap_or("");
    let password = parts.next().unwrap_or("");

    if username == user && password == pass {
        true
    } else {
        warn!("[Auth] Invalid credentials for user: {}", username);
        false
    }
}

/// Basic auth middleware.
///
/// If `VIEWERPOOL_WEB_PASS` is not set, authentication is disabled (open access).
/// When enabled, all requests must include a valid `Authorization: Basic ...` header.
pub async fn basic_auth_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected_pass = match std::env::var("VIEWERPOOL_WEB_PASS") {
        Ok(p) if !p.is_empty() => p,
        _ => {
            // No password configured — skip auth
            return Ok(next.run(request).await);
        }
    };

    let expected_user = std::env::var("VIEWERPOOL_WEB_USER")
        .unwrap_or_else(|_| "admin".to_string());

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(header) if credentials_match(header, &expected_user, &expected_pass) => {
            Ok(next.run(request).await)
        }
        Some(_) => Err(StatusCode::UNAUTHORIZED),
        None => {
            warn!("[Auth] Missing Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
