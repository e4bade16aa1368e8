//! Admin console authentication.
//!
//! The admin logs in with a shared code and receives an opaque session id in
//! an HttpOnly cookie. Sessions live in memory and expire after 24 hours.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::api::ApiJson;
use crate::error::AppError;

pub const SESSION_COOKIE: &str = "admin_session";
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared admin code (None = auth disabled)
    pub admin_code: Option<String>,
    /// Mark the session cookie Secure (HTTPS deployments)
    pub secure_cookie: bool,
}

impl AuthConfig {
    /// Load auth config from ADMIN_CODE and COOKIE_SECURE
    pub fn from_env() -> Self {
        let admin_code = std::env::var("ADMIN_CODE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let secure_cookie = std::env::var("COOKIE_SECURE")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false);

        if admin_code.is_some() {
            tracing::info!(secure_cookie, "Admin authentication enabled");
        } else {
            tracing::warn!("Admin authentication DISABLED - anyone can manage rooms! Set ADMIN_CODE");
        }

        Self {
            admin_code,
            secure_cookie,
        }
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.admin_code.is_some()
    }

    /// Validate a login code
    pub fn validate(&self, code: &str) -> bool {
        match &self.admin_code {
            // Use constant-time comparison to prevent timing attacks
            Some(expected) => constant_time_eq(expected.as_bytes(), code.trim().as_bytes()),
            None => true, // Auth disabled, allow all
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Auth config plus the live admin sessions
#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub config: AuthConfig,
    /// Session id -> issue time
    sessions: Arc<RwLock<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl AdminAuth {
    pub fn new(config: AuthConfig) -> Self {
        Self::with_ttl(config, SESSION_TTL)
    }

    pub fn with_ttl(config: AuthConfig, ttl: Duration) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Exchange the admin code for a new session id
    pub async fn login(&self, code: &str) -> Option<String> {
        if !self.config.validate(code) {
            return None;
        }

        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let session_id = hex::encode(bytes);

        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, issued| now.duration_since(*issued) < self.ttl);
        sessions.insert(session_id.clone(), now);
        Some(session_id)
    }

    /// Check a session id, dropping it if expired
    pub async fn is_valid_session(&self, session_id: &str) -> bool {
        let issued = self.sessions.read().await.get(session_id).copied();
        match issued {
            Some(issued) if issued.elapsed() < self.ttl => true,
            Some(_) => {
                self.sessions.write().await.remove(session_id);
                false
            }
            None => false,
        }
    }

    pub async fn logout(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Set-Cookie value carrying a session id
    pub fn session_cookie(&self, session_id: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            session_id,
            self.ttl.as_secs()
        );
        if self.config.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Set-Cookie value that clears the session cookie
    pub fn clear_cookie(&self) -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
    }
}

/// Find a cookie by name across all Cookie headers
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// Middleware requiring a valid admin session cookie
pub async fn admin_auth_middleware(
    State(auth): State<Arc<AdminAuth>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    // If auth is disabled, pass through
    if !auth.config.is_enabled() {
        return next.run(request).await;
    }

    if let Some(session_id) = cookie_value(request.headers(), SESSION_COOKIE) {
        if auth.is_valid_session(&session_id).await {
            return next.run(request).await;
        }
    }

    tracing::debug!(uri = %request.uri(), "Rejected admin request without valid session");
    AppError::Unauthorized("Unauthorized".to_string()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub code: String,
}

/// POST /api/admin/login
pub async fn login(
    State(auth): State<Arc<AdminAuth>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Response<Body> {
    match auth.login(&req.code).await {
        Some(session_id) => {
            tracing::info!("Admin logged in");
            (
                StatusCode::OK,
                [(header::SET_COOKIE, auth.session_cookie(&session_id))],
                Json(json!({ "success": true })),
            )
                .into_response()
        }
        None => {
            tracing::warn!("Admin login failed");
            AppError::Unauthorized("Invalid admin code".to_string()).into_response()
        }
    }
}

/// POST /api/admin/logout
pub async fn logout(State(auth): State<Arc<AdminAuth>>, headers: HeaderMap) -> Response<Body> {
    if let Some(session_id) = cookie_value(&headers, SESSION_COOKIE) {
        auth.logout(&session_id).await;
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, auth.clear_cookie())],
        Json(json!({ "success": true })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn enabled_config() -> AuthConfig {
        AuthConfig {
            admin_code: Some("holi-2026".to_string()),
            secure_cookie: false,
        }
    }

    #[test]
    fn test_auth_config_disabled() {
        let config = AuthConfig {
            admin_code: None,
            secure_cookie: false,
        };
        assert!(!config.is_enabled());
        assert!(config.validate("anything")); // Passes when disabled
    }

    #[test]
    fn test_auth_config_enabled() {
        let config = enabled_config();
        assert!(config.is_enabled());
        assert!(config.validate("holi-2026"));
        assert!(config.validate(" holi-2026 "));
        assert!(!config.validate("holi-2025"));
        assert!(!config.validate(""));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; admin_session=abc123; other=1"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE),
            Some("abc123".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[tokio::test]
    async fn test_login_and_session() {
        let auth = AdminAuth::new(enabled_config());

        assert!(auth.login("wrong").await.is_none());

        let session = auth.login("holi-2026").await.unwrap();
        assert_eq!(session.len(), 64);
        assert!(auth.is_valid_session(&session).await);
        assert!(!auth.is_valid_session("forged").await);

        auth.logout(&session).await;
        assert!(!auth.is_valid_session(&session).await);
    }

    #[tokio::test]
    async fn test_session_expires() {
        let auth = AdminAuth::with_ttl(enabled_config(), Duration::from_millis(20));
        let session = auth.login("holi-2026").await.unwrap();
        assert!(auth.is_valid_session(&session).await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!auth.is_valid_session(&session).await);
    }

    #[test]
    fn test_session_cookie_flags() {
        let auth = AdminAuth::new(enabled_config());
        let cookie = auth.session_cookie("abc");
        assert!(cookie.starts_with("admin_session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(!cookie.contains("Secure"));

        let secure = AdminAuth::new(AuthConfig {
            secure_cookie: true,
            ..enabled_config()
        });
        assert!(secure.session_cookie("abc").ends_with("; Secure"));
    }
}
