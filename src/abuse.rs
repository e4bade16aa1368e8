//! Anti-abuse middleware for admin login.
//!
//! Guessing the shared admin code is the one attack worth throttling, so
//! login gets a fixed-window rate limit per client IP. Participant routes are
//! never limited by IP: at a live event many phones share the venue's public
//! address, and claims already have a per-participant cooldown.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    middleware::Next,
    response::IntoResponse,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::error::AppError;

/// Prune stale windows once the table grows past this
const CLEANUP_THRESHOLD: usize = 10_000;

/// Rate limiter state
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Map of client key to (request count, window start)
    requests: Arc<RwLock<HashMap<String, (u32, Instant)>>>,
    /// Maximum requests per window
    max_requests: u32,
    /// Time window duration
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(60)) // 20 requests per minute
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Check if a request should be allowed.
    /// Returns the time left in the window when the key is over its budget.
    pub async fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        if requests.len() > CLEANUP_THRESHOLD {
            let window = self.window;
            requests.retain(|_, (_, window_start)| now.duration_since(*window_start) < window);
        }

        match requests.get_mut(key) {
            Some((count, window_start)) => {
                let elapsed = now.duration_since(*window_start);
                if elapsed >= self.window {
                    *count = 1;
                    *window_start = now;
                    Ok(())
                } else if *count >= self.max_requests {
                    Err(self.window - elapsed)
                } else {
                    *count += 1;
                    Ok(())
                }
            }
            None => {
                requests.insert(key.to_string(), (1, now));
                Ok(())
            }
        }
    }

    /// Number of tracked clients
    pub async fn tracked(&self) -> usize {
        self.requests.read().await.len()
    }
}

/// Anti-abuse configuration
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Rate limiter (None = disabled)
    pub rate_limiter: Option<RateLimiter>,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            rate_limiter: Some(RateLimiter::default()),
        }
    }
}

impl AbuseConfig {
    /// No limits at all
    pub fn disabled() -> Self {
        Self { rate_limiter: None }
    }

    /// Load config from environment variables
    pub fn from_env() -> Self {
        let rate_limit_enabled = std::env::var("ABUSE_RATE_LIMIT")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limiter = if rate_limit_enabled {
            let max_requests = std::env::var("ABUSE_RATE_LIMIT_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20);

            let window_secs = std::env::var("ABUSE_RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);

            Some(RateLimiter::new(
                max_requests,
                Duration::from_secs(window_secs),
            ))
        } else {
            None
        };

        tracing::info!(rate_limit_enabled, "Anti-abuse config loaded");

        Self { rate_limiter }
    }
}

/// Rate limit key for a request: the peer IP, when the listener exposes it.
/// Requests without connection info (in-process tests) are not limited.
fn get_rate_limit_key(request: &Request<Body>) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
}

/// Per-IP rate limit for admin login
pub async fn rate_limit_middleware(
    State(config): State<Arc<AbuseConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if let Some(ref rate_limiter) = config.rate_limiter {
        if let Some(key) = get_rate_limit_key(&request) {
            if let Err(retry_after) = rate_limiter.check(&key).await {
                tracing::warn!(key, uri = %request.uri(), "Rate limited");
                return AppError::RateLimited { retry_after }.into_response();
            }
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_allows_normal_traffic() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));

        // First 5 requests should pass
        for _ in 0..5 {
            assert!(limiter.check("test-key").await.is_ok());
        }

        // 6th should be blocked, with the rest of the window to wait
        let wait = limiter.check("test-key").await.unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rate_limiter_different_keys() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));

        // Different keys have separate limits
        assert!(limiter.check("key1").await.is_ok());
        assert!(limiter.check("key1").await.is_ok());
        assert!(limiter.check("key1").await.is_err());

        assert!(limiter.check("key2").await.is_ok());
        assert!(limiter.check("key2").await.is_ok());
        assert!(limiter.check("key2").await.is_err());
        assert_eq!(limiter.tracked().await, 2);
    }

    #[tokio::test]
    async fn test_rate_limiter_window_reset() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));

        assert!(limiter.check("key").await.is_ok());
        assert!(limiter.check("key").await.is_ok());
        assert!(limiter.check("key").await.is_err());

        // Wait for window to reset
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Should be allowed again
        assert!(limiter.check("key").await.is_ok());
    }

    #[test]
    fn test_rate_limit_key_from_connect_info() {
        let mut request = Request::new(Body::empty());
        assert_eq!(get_rate_limit_key(&request), None);

        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 51234))));
        assert_eq!(get_rate_limit_key(&request), Some("ip:10.0.0.7".to_string()));
    }

    #[test]
    fn test_abuse_config_default() {
        assert!(AbuseConfig::default().rate_limiter.is_some());
        assert!(AbuseConfig::disabled().rate_limiter.is_none());
    }
}
