//! Mesh configuration loaded from environment variables.
//!
//! Every setting has a default matching the reference behaviour, so a node
//! can start with zero configuration.

use std::str::FromStr;
use std::time::Duration;

use meshchat_shared::constants::{
    CONNECT_TIMEOUT_MS, HISTORY_CAPACITY, MAX_JOIN_ATTEMPTS, RATE_LIMIT_MAX_MESSAGES,
    RATE_LIMIT_WINDOW_MS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS, RETRY_MULTIPLIER,
    ROSTER_CAPACITY, SEEN_CAPACITY,
};

/// Retry schedule for attaching to the signaling server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a join (or a signaling reconnect) gives up.
    /// Env: `MESH_MAX_ATTEMPTS`
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    /// Env: `MESH_RETRY_BASE_MS`
    pub base_delay: Duration,
    /// Growth factor between consecutive delays (1 = fixed delay).
    pub multiplier: u32,
    /// Upper bound on any single delay.
    /// Env: `MESH_RETRY_MAX_MS`
    pub max_delay: Duration,
    /// Time allowed for one attempt before it is cancelled.
    /// Env: `MESH_CONNECT_TIMEOUT_MS`
    pub attempt_timeout: Duration,
    /// Fixed wait before re-attaching after the signaling link drops.
    pub reconnect_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_JOIN_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            multiplier: RETRY_MULTIPLIER,
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
            attempt_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1,
            max_delay: delay,
            reconnect_delay: delay,
            ..Self::default()
        }
    }

    /// Delay to wait after attempt number `failed_attempt` (1-based) failed.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What to do when a `history` response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Every non-empty response replaces the local view (last responder wins).
    #[default]
    ReplaceAll,
    /// Only the first non-empty response is applied; later ones are ignored.
    FirstOnly,
}

impl FromStr for HistoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace-all" | "replace_all" => Ok(Self::ReplaceAll),
            "first-only" | "first_only" => Ok(Self::FirstOnly),
            other => Err(format!("unknown history policy: {other}")),
        }
    }
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub retry: RetryPolicy,

    /// Local chat messages admitted per window.
    /// Env: `MESH_RATE_LIMIT_MAX`
    pub rate_limit_max: usize,

    /// Sliding window for the local rate limit.
    /// Env: `MESH_RATE_LIMIT_WINDOW_MS`
    pub rate_limit_window: Duration,

    /// Entries kept in the history buffer and sent on replay.
    pub history_capacity: usize,

    /// Message ids remembered for duplicate suppression.
    pub seen_capacity: usize,

    /// Peer ids kept in the shared roster.
    pub roster_capacity: usize,

    /// Env: `MESH_HISTORY_POLICY` (`replace-all` | `first-only`)
    pub history_policy: HistoryPolicy,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rate_limit_max: RATE_LIMIT_MAX_MESSAGES,
            rate_limit_window: Duration::from_millis(RATE_LIMIT_WINDOW_MS),
            history_capacity: HISTORY_CAPACITY,
            seen_capacity: SEEN_CAPACITY,
            roster_capacity: ROSTER_CAPACITY,
            history_policy: HistoryPolicy::default(),
        }
    }
}

impl MeshConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_var::<u32>(&lookup, "MESH_MAX_ATTEMPTS") {
            config.retry.max_attempts = n.max(1);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MESH_RETRY_BASE_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
            config.retry.reconnect_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MESH_RETRY_MAX_MS") {
            config.retry.max_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MESH_CONNECT_TIMEOUT_MS") {
            config.retry.attempt_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "MESH_RATE_LIMIT_MAX") {
            config.rate_limit_max = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MESH_RATE_LIMIT_WINDOW_MS") {
            config.rate_limit_window = Duration::from_millis(ms);
        }

        if let Some(policy) = parse_var::<HistoryPolicy>(&lookup, "MESH_HISTORY_POLICY") {
            config.history_policy = policy;
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
