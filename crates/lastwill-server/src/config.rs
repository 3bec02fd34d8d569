//! Server configuration, parsed from a TOML file plus environment overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use lastwill_keeper::KeeperConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    /// Ledger gateway
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Keeper behaviour
    #[serde(default)]
    pub keeper: KeeperSection,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Data directory (keystore, cursor)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// JSON-RPC gateway URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Delay between registry polls for new contracts
    #[serde(default = "default_registry_poll")]
    pub registry_poll_secs: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            registry_poll_secs: default_registry_poll(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperSection {
    /// Fee asked per check-in
    #[serde(default = "default_fee")]
    pub fee: u64,

    /// Ignore contracts whose owner may stay silent longer than this
    #[serde(default = "default_max_check_in_interval")]
    pub max_check_in_interval_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Registry entries re-scanned at startup
    #[serde(default = "default_backfill_depth")]
    pub backfill_depth: u64,

    #[serde(default = "default_backfill_concurrency")]
    pub backfill_concurrency: usize,

    /// Encrypts the keeper key at rest when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore_passphrase: Option<String>,
}

impl Default for KeeperSection {
    fn default() -> Self {
        Self {
            fee: default_fee(),
            max_check_in_interval_secs: default_max_check_in_interval(),
            poll_interval_secs: default_poll_interval(),
            backfill_depth: default_backfill_depth(),
            backfill_concurrency: default_backfill_concurrency(),
            keystore_passphrase: None,
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8645".to_string()
}

fn default_registry_poll() -> u64 {
    15
}

fn default_fee() -> u64 {
    KeeperConfig::default().fee
}

fn default_max_check_in_interval() -> u64 {
    KeeperConfig::default().max_check_in_interval_secs
}

fn default_poll_interval() -> u64 {
    KeeperConfig::default().poll_interval.as_secs()
}

fn default_backfill_depth() -> u64 {
    KeeperConfig::default().backfill_depth
}

fn default_backfill_concurrency() -> usize {
    KeeperConfig::default().backfill_concurrency
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `LASTWILL_DATA_DIR`
    /// - `LASTWILL_LOG_LEVEL`
    /// - `LASTWILL_RPC_URL`
    /// - `LASTWILL_REGISTRY_POLL`
    /// - `LASTWILL_FEE`
    /// - `LASTWILL_MAX_CHECK_IN_INTERVAL`
    /// - `LASTWILL_POLL_INTERVAL`
    /// - `LASTWILL_BACKFILL_DEPTH`
    /// - `LASTWILL_BACKFILL_CONCURRENCY`
    /// - `LASTWILL_KEYSTORE_PASSPHRASE`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LASTWILL_DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LASTWILL_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("LASTWILL_RPC_URL") {
            self.ledger.rpc_url = v;
        }
        override_parsed("LASTWILL_REGISTRY_POLL", &mut self.ledger.registry_poll_secs);
        override_parsed("LASTWILL_FEE", &mut self.keeper.fee);
        override_parsed(
            "LASTWILL_MAX_CHECK_IN_INTERVAL",
            &mut self.keeper.max_check_in_interval_secs,
        );
        override_parsed("LASTWILL_POLL_INTERVAL", &mut self.keeper.poll_interval_secs);
        override_parsed("LASTWILL_BACKFILL_DEPTH", &mut self.keeper.backfill_depth);
        override_parsed(
            "LASTWILL_BACKFILL_CONCURRENCY",
            &mut self.keeper.backfill_concurrency,
        );
        if let Ok(v) = std::env::var("LASTWILL_KEYSTORE_PASSPHRASE") {
            self.keeper.keystore_passphrase = Some(v).filter(|p| !p.is_empty());
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            LOG_LEVELS.contains(&self.server.log_level.to_ascii_lowercase().as_str()),
            "server.log_level must be one of {}",
            LOG_LEVELS.join(", ")
        );

        let url = &self.ledger.rpc_url;
        anyhow::ensure!(
            url.starts_with("http://") || url.starts_with("https://"),
            "ledger.rpc_url must be an http(s) URL"
        );
        anyhow::ensure!(
            self.ledger.registry_poll_secs > 0,
            "ledger.registry_poll_secs must be > 0"
        );

        anyhow::ensure!(
            self.keeper.max_check_in_interval_secs > 0,
            "keeper.max_check_in_interval_secs must be > 0"
        );
        anyhow::ensure!(
            self.keeper.poll_interval_secs > 0,
            "keeper.poll_interval_secs must be > 0"
        );
        anyhow::ensure!(
            self.keeper.backfill_concurrency > 0,
            "keeper.backfill_concurrency must be > 0"
        );

        Ok(())
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.server.data_dir.join("keeper_key.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.server.data_dir.join("keeper_state.json")
    }

    pub fn registry_poll(&self) -> Duration {
        Duration::from_secs(self.ledger.registry_poll_secs)
    }

    /// Keeper settings, with the cursor kept in the data directory.
    pub fn keeper_config(&self) -> KeeperConfig {
        KeeperConfig {
            fee: self.keeper.fee,
            max_check_in_interval_secs: self.keeper.max_check_in_interval_secs,
            poll_interval: Duration::from_secs(self.keeper.poll_interval_secs),
            backfill_depth: self.keeper.backfill_depth,
            backfill_concurrency: self.keeper.backfill_concurrency,
            state_path: Some(self.state_path()),
        }
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var) {
        match v.parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring {}: not a number", var),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
