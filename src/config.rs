//! Environment-driven configuration for the server and the challenge rules.

use chrono::TimeDelta;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Listener and storage settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Snapshot file rewritten after each mutation (None = memory only)
    pub snapshot_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Load from BIND_ADDR and SNAPSHOT_PATH
    pub fn from_env() -> Self {
        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
                tracing::warn!(raw, "Invalid BIND_ADDR ({}), using {}", e, DEFAULT_BIND_ADDR);
                default_bind_addr()
            }),
            Err(_) => default_bind_addr(),
        };

        let snapshot_path = std::env::var("SNAPSHOT_PATH")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        if snapshot_path.is_none() {
            tracing::warn!("SNAPSHOT_PATH not set - rooms and claims are kept in memory only");
        }

        Self {
            bind_addr,
            snapshot_path,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

/// Timing and sizing rules for claims and summaries
#[derive(Debug, Clone)]
pub struct Rules {
    /// Minimum spacing between two claims of one participant
    pub claim_cooldown: TimeDelta,
    /// How long a participant may retract their own claim
    pub self_cancel_window: TimeDelta,
    pub leaderboard_size: usize,
    pub events_limit: usize,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            claim_cooldown: TimeDelta::milliseconds(3000),
            self_cancel_window: TimeDelta::minutes(10),
            leaderboard_size: 10,
            events_limit: 100,
        }
    }
}

impl Rules {
    /// Load from CLAIM_COOLDOWN_MS, SELF_CANCEL_WINDOW_SECS, LEADERBOARD_SIZE and EVENTS_LIMIT
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let claim_cooldown = env_parse::<i64>("CLAIM_COOLDOWN_MS")
            .and_then(TimeDelta::try_milliseconds)
            .filter(|d| *d >= TimeDelta::zero())
            .unwrap_or(defaults.claim_cooldown);

        let self_cancel_window = env_parse::<i64>("SELF_CANCEL_WINDOW_SECS")
            .and_then(TimeDelta::try_seconds)
            .filter(|d| *d >= TimeDelta::zero())
            .unwrap_or(defaults.self_cancel_window);

        let leaderboard_size = env_parse::<usize>("LEADERBOARD_SIZE")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.leaderboard_size);

        let events_limit = env_parse::<usize>("EVENTS_LIMIT")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.events_limit);

        tracing::info!(
            cooldown_ms = claim_cooldown.num_milliseconds(),
            self_cancel_window_secs = self_cancel_window.num_seconds(),
            leaderboard_size,
            events_limit,
            "Challenge rules loaded"
        );

        Self {
            claim_cooldown,
            self_cancel_window,
            leaderboard_size,
            events_limit,
        }
    }
}

/// Parse an env var, ignoring absent or malformed values
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
