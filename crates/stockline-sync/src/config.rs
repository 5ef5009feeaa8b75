//! # Gateway Configuration
//!
//! ## Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Later sources override earlier                         │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKLINE_DB_PATH=/var/lib/stockline/stockline.db                  │
//! │     STOCKLINE_LOCK_WAIT_MS=2000                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockline/gateway.toml (Linux)                           │
//! │     ~/Library/Application Support/com.stockline.stockline/...  (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## gateway.toml
//! ```toml
//! # gateway.toml
//! [database]
//! path = "/var/lib/stockline/stockline.db"
//! max_connections = 8
//! busy_timeout_ms = 5000
//!
//! [locks]
//! wait_ms = 3000     # bounded wait for per-product stock locks
//!
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//!
//! [facts]
//! channel_capacity = 1024
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use stockline_db::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Created on first start.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a statement waits for SQLite's write lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stockline.db")
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Lock Settings
// =============================================================================

/// Bounded wait for per-product stock locks.
///
/// A call that cannot take all of its locks within `wait_ms` fails with a
/// retryable `LockTimeout` instead of queueing forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_wait")]
    pub wait_ms: u64,
}

fn default_lock_wait() -> u64 {
    3_000
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            wait_ms: default_lock_wait(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    /// `host:port` for the TCP listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Fact Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactSettings {
    /// Broadcast buffer; slow subscribers lag past this many facts.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for FactSettings {
    fn default() -> Self {
        FactSettings {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// =============================================================================
// Gateway Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub locks: LockSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub facts: FactSettings,
}

impl GatewayConfig {
    /// Defaults, then `gateway.toml` (explicit path or the platform config
    /// dir), then `STOCKLINE_*` variables. The result is validated.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = match config_path.or_else(Self::default_config_path) {
            Some(path) if path.exists() => {
                info!(?path, "Reading gateway.toml");
                toml::from_str(&std::fs::read_to_string(&path)?)?
            }
            Some(path) => {
                debug!(?path, "No gateway.toml, starting from defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would stall every request.
    pub fn validate(&self) -> SyncResult<()> {
        let zeroes = [
            ("database.max_connections", self.database.max_connections == 0),
            ("locks.wait_ms", self.locks.wait_ms == 0),
            ("facts.channel_capacity", self.facts.channel_capacity == 0),
        ];

        match zeroes.iter().find(|(_, zero)| *zero) {
            Some((key, _)) => Err(SyncError::InvalidConfig(format!("{key} must be greater than 0"))),
            None => Ok(()),
        }
    }

    /// Applies `STOCKLINE_*` overrides read through `lookup`.
    ///
    /// Unparseable numbers are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("STOCKLINE_DB_PATH") {
            debug!(path = %path, "Database path overridden");
            self.database.path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("STOCKLINE_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        override_parsed(&lookup, "STOCKLINE_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed(&lookup, "STOCKLINE_DB_BUSY_TIMEOUT_MS", &mut self.database.busy_timeout_ms);
        override_parsed(&lookup, "STOCKLINE_LOCK_WAIT_MS", &mut self.locks.wait_ms);
        override_parsed(&lookup, "STOCKLINE_PORT", &mut self.server.port);
        override_parsed(&lookup, "STOCKLINE_FACTS_CAPACITY", &mut self.facts.channel_capacity);
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockline", "stockline")
            .map(|dirs| dirs.config_dir().join("gateway.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.locks.wait_ms)
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else { return };
    match raw.parse() {
        Ok(value) => {
            debug!(key, value = %raw, "Setting overridden");
            *slot = value;
        }
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.locks.wait_ms, 3_000);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [locks]
            wait_ms = 250

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.locks.wait_ms, 250);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_addr, "0.0.0.0");
        assert_eq!(config.database.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("STOCKLINE_DB_PATH", "/tmp/override.db"),
            ("STOCKLINE_LOCK_WAIT_MS", "125"),
            ("STOCKLINE_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.lock_wait(), Duration::from_millis(125));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_validation() {
        let mut config = GatewayConfig::default();
        config.locks.wait_ms = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = GatewayConfig::default();
        config.facts.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[database]\nmax_connections = 2\n").unwrap();

        let config = GatewayConfig::load(Some(path)).unwrap();
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.db_config().max_connections, 2);
    }
}
