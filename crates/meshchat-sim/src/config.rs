//! Simulator configuration loaded from environment variables.
//!
//! Defaults give a small mesh that settles in well under a second.

use std::path::PathBuf;
use std::time::Duration;

/// Where the shared roster lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreLocation {
    /// In memory, gone when the simulator exits.
    #[default]
    Memory,
    /// `store.json` under the platform data directory.
    DataDir,
    /// An explicit JSON file.
    File(PathBuf),
}

/// Simulator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Number of nodes joined one after another.
    /// Env: `SIM_PEERS`
    /// Default: `4`
    pub peers: usize,

    /// Chat lines each node sends once everyone has joined.
    /// Env: `SIM_MESSAGES`
    /// Default: `3`
    pub messages: usize,

    /// JSON file backing the shared roster. In memory when unset,
    /// the platform data directory when `default`.
    /// Env: `SIM_STORE_PATH`
    pub store: StoreLocation,

    /// Pause after each join and after the chat burst.
    /// Env: `SIM_SETTLE_MS`
    /// Default: `250`
    pub settle: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 4,
            messages: 3,
            store: StoreLocation::Memory,
            settle: Duration::from_millis(250),
        }
    }
}

impl SimConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("SIM_PEERS") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.peers = n,
                _ => tracing::warn!(value = %val, "Invalid SIM_PEERS, using default"),
            }
        }

        if let Some(val) = lookup("SIM_MESSAGES") {
            match val.trim().parse::<usize>() {
                Ok(n) => config.messages = n,
                Err(_) => tracing::warn!(value = %val, "Invalid SIM_MESSAGES, using default"),
            }
        }

        if let Some(path) = lookup("SIM_STORE_PATH") {
            config.store = match path.trim() {
                "" => StoreLocation::Memory,
                "default" => StoreLocation::DataDir,
                _ => StoreLocation::File(PathBuf::from(path)),
            };
        }

        if let Some(val) = lookup("SIM_SETTLE_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) => config.settle = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid SIM_SETTLE_MS, using default"),
            }
        }

        config
    }
}
