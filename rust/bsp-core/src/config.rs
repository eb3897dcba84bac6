// rust/bsp-core/src/config.rs

//! Configuration for the coordination core.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values. The core only
//! consumes already-resolved typed values; how a job assembles them is up to
//! the launcher.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::paths::{validate_segment, DEFAULT_ROOT};
use crate::error::{CoordinationError, Result};

// Top-level coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub heartbeat: HeartbeatConfig,
    pub payload: PayloadConfig,
    pub quorum: QuorumConfig,
}

/// Connection settings for the coordination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Comma-separated `host:port` list of the store ensemble.
    pub servers: String,
    /// Session timeout negotiated with the store, in milliseconds.
    pub session_timeout_ms: u64,
    /// Connect attempts before giving up on the store.
    pub max_connect_attempts: u32,
    /// Wait between connect attempts, in milliseconds.
    pub retry_wait_ms: u64,
    /// Name of the root node all application state lives under.
    pub root_node: String,
}

/// Backoff used while waiting on a barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Sleep a constant unit per attempt (true) or `attempt * unit` (false).
    pub fixed_delay: bool,
    /// Sleep unit in milliseconds.
    pub delay_unit_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether to touch the root node periodically to keep the session warm.
    pub enabled: bool,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// Largest payload stored in a single node; larger ones are split.
    pub node_data_limit: usize,
    /// Number of chunk reads/writes in flight at once.
    pub pool_size: usize,
}

// Partial-quorum settings for worker barriers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    // Fraction of workers that may end a barrier once the timeout passed.
    pub min_ratio: f64,
    // Time budget before a partial quorum is accepted, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            servers: String::new(),
            session_timeout_ms: 300_000, // 5 minutes
            max_connect_attempts: 5,
            retry_wait_ms: 1_000,
            root_node: DEFAULT_ROOT.to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fixed_delay: true,
            delay_unit_ms: 300,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 15_000,
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            node_data_limit: 1024 * 1024, // 1 MiB
            pool_size: 8,
        }
    }
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            min_ratio: 0.97,
            timeout_ms: 10_000,
        }
    }
}

impl StoreConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl FromStr for CoordinatorConfig {
    type Err = CoordinationError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| CoordinationError::config_with_source("failed to parse TOML config", e))
    }
}

impl CoordinatorConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoordinationError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `BSP_` and use underscores
    // to separate nested fields. For example:
    // - `BSP_STORE_SERVERS` overrides `store.servers`
    // - `BSP_RETRY_FIXED_DELAY` overrides `retry.fixed_delay`
    // - `BSP_PAYLOAD_POOL_SIZE` overrides `payload.pool_size`
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Store overrides
        if let Ok(val) = std::env::var("BSP_STORE_SERVERS") {
            self.store.servers = val;
        }
        if let Ok(val) = std::env::var("BSP_STORE_SESSION_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.store.session_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("BSP_STORE_MAX_CONNECT_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.store.max_connect_attempts = v;
            }
        }
        if let Ok(val) = std::env::var("BSP_STORE_RETRY_WAIT_MS") {
            if let Ok(v) = val.parse() {
                self.store.retry_wait_ms = v;
            }
        }
        if let Ok(val) = std::env::var("BSP_STORE_ROOT_NODE") {
            self.store.root_node = val;
        }

        // Retry overrides
        if let Ok(val) = std::env::var("BSP_RETRY_FIXED_DELAY") {
            if let Ok(v) = val.to_lowercase().parse() {
                self.retry.fixed_delay = v;
            }
        }
        if let Ok(val) = std::env::var("BSP_RETRY_DELAY_UNIT_MS") {
            if let Ok(v) = val.parse() {
                self.retry.delay_unit_ms = v;
            }
        }

        // Heartbeat overrides
        if let Ok(val) = std::env::var("BSP_HEARTBEAT_ENABLED") {
            if let Ok(v) = val.to_lowercase().parse() {
                self.heartbeat.enabled = v;
            }
        }
        if let Ok(val) = std::env::var("BSP_HEARTBEAT_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.heartbeat.interval_ms = v;
            }
        }

        // Payload overrides
        if let Ok(val) = std::env::var("BSP_PAYLOAD_NODE_DATA_LIMIT") {
            if let Ok(v) = val.parse() {
                self.payload.node_data_limit = v;
            }
        }
        if let Ok(val) = std::env::var("BSP_PAYLOAD_POOL_SIZE") {
            if let Ok(v) = val.parse() {
                self.payload.pool_size = v;
            }
        }

        // Quorum overrides
        if let Ok(val) = std::env::var("BSP_QUORUM_MIN_RATIO") {
            if let Ok(v) = val.parse() {
                self.quorum.min_ratio = v;
            }
        }
        if let Ok(val) = std::env::var("BSP_QUORUM_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.quorum.timeout_ms = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        // Store validation
        if self.store.servers.trim().is_empty() {
            return Err(CoordinationError::config(
                "store.servers must be set for coordination",
            ));
        }
        if self.store.session_timeout_ms == 0 {
            return Err(CoordinationError::config(
                "store.session_timeout_ms must be greater than 0",
            ));
        }
        if self.store.max_connect_attempts == 0 {
            return Err(CoordinationError::config(
                "store.max_connect_attempts must be greater than 0",
            ));
        }
        validate_segment(&self.store.root_node).map_err(|e| {
            CoordinationError::config_with_source("store.root_node is not a valid segment", e)
        })?;

        // Retry validation
        if self.retry.delay_unit_ms == 0 {
            return Err(CoordinationError::config(
                "retry.delay_unit_ms must be greater than 0",
            ));
        }

        // Heartbeat validation
        if self.heartbeat.interval_ms == 0 {
            return Err(CoordinationError::config(
                "heartbeat.interval_ms must be greater than 0",
            ));
        }

        // Payload validation
        if self.payload.node_data_limit == 0 {
            return Err(CoordinationError::config(
                "payload.node_data_limit must be greater than 0",
            ));
        }
        if self.payload.pool_size == 0 {
            return Err(CoordinationError::config(
                "payload.pool_size must be greater than 0",
            ));
        }

        // Quorum validation
        if !(0.0..=1.0).contains(&self.quorum.min_ratio) {
            return Err(CoordinationError::config(
                "quorum.min_ratio must be within [0, 1]",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn with_servers() -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.store.servers = "zk1:2181,zk2:2181".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();

        assert!(config.store.servers.is_empty());
        assert_eq!(config.store.session_timeout(), Duration::from_secs(300));
        assert_eq!(config.store.max_connect_attempts, 5);
        assert_eq!(config.store.retry_wait(), Duration::from_secs(1));
        assert_eq!(config.store.root_node, "_bsp");

        assert!(config.retry.fixed_delay);
        assert_eq!(config.retry.delay_unit_ms, 300);

        assert!(!config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(15));

        assert_eq!(config.payload.node_data_limit, 1024 * 1024);
        assert_eq!(config.payload.pool_size, 8);

        assert_eq!(config.quorum.min_ratio, 0.97);
        assert_eq!(config.quorum.timeout_ms, 10_000);
    }

    #[test]
    fn test_default_requires_servers() {
        let result = CoordinatorConfig::default().validate();
        assert!(result.unwrap_err().to_string().contains("store.servers"));
        assert!(with_servers().validate().is_ok());
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [store]
            servers = "localhost:2181"

            [payload]
            pool_size = 2
        "#;
        let config: CoordinatorConfig = toml.parse().unwrap();

        assert_eq!(config.store.servers, "localhost:2181");
        assert_eq!(config.payload.pool_size, 2);
        // Other fields should be defaults
        assert_eq!(config.payload.node_data_limit, 1024 * 1024);
        assert!(config.retry.fixed_delay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [store]
            servers = "zk1:2181"
            session_timeout_ms = 60000
            max_connect_attempts = 3
            retry_wait_ms = 250
            root_node = "jobs"

            [retry]
            fixed_delay = false
            delay_unit_ms = 50

            [heartbeat]
            enabled = true
            interval_ms = 5000

            [payload]
            node_data_limit = 4096
            pool_size = 16

            [quorum]
            min_ratio = 0.9
            timeout_ms = 2000
        "#;

        let config: CoordinatorConfig = toml.parse().unwrap();

        assert_eq!(config.store.session_timeout_ms, 60_000);
        assert_eq!(config.store.max_connect_attempts, 3);
        assert_eq!(config.store.retry_wait_ms, 250);
        assert_eq!(config.store.root_node, "jobs");
        assert!(!config.retry.fixed_delay);
        assert_eq!(config.retry.delay_unit_ms, 50);
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_ms, 5000);
        assert_eq!(config.payload.node_data_limit, 4096);
        assert_eq!(config.payload.pool_size, 16);
        assert_eq!(config.quorum.min_ratio, 0.9);
        assert_eq!(config.quorum.timeout_ms, 2000);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<CoordinatorConfig, _> = "store = [".parse();
        assert!(matches!(result, Err(CoordinationError::Config { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [store]
            servers = "zk:2181"
            "#
        )
        .unwrap();

        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.servers, "zk:2181");
    }

    #[test]
    fn test_from_file_validates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[payload]\npool_size = 4").unwrap();

        // servers missing
        assert!(CoordinatorConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_not_found() {
        let result = CoordinatorConfig::from_file("/nonexistent/coordinator.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_root_node() {
        let mut config = with_servers();
        config.store.root_node = "a/b".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("root_node"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = with_servers();
        config.retry.delay_unit_ms = 0;
        assert!(config.validate().is_err());

        let mut config = with_servers();
        config.heartbeat.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = with_servers();
        config.payload.node_data_limit = 0;
        assert!(config.validate().is_err());

        let mut config = with_servers();
        config.payload.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = with_servers();
        config.store.max_connect_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ratio_out_of_range() {
        let mut config = with_servers();
        config.quorum.min_ratio = 1.5;
        assert!(config.validate().is_err());

        config.quorum.min_ratio = -0.1;
        assert!(config.validate().is_err());

        config.quorum.min_ratio = 0.0;
        assert!(config.validate().is_ok());
    }

    // Helper to clear all BSP_ environment variables for test isolation
    fn clear_bsp_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("BSP_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variable tests are combined into a single test to avoid
    // race conditions when tests run in parallel, since env vars are global state.
    #[test]
    fn test_env_overrides() {
        clear_bsp_env_vars();

        std::env::set_var("BSP_STORE_SERVERS", "env-zk:2181");
        std::env::set_var("BSP_RETRY_FIXED_DELAY", "FALSE");
        std::env::set_var("BSP_HEARTBEAT_ENABLED", "true");
        std::env::set_var("BSP_PAYLOAD_POOL_SIZE", "3");
        std::env::set_var("BSP_QUORUM_MIN_RATIO", "0.5");

        let config = CoordinatorConfig::default().with_env_overrides();

        assert_eq!(config.store.servers, "env-zk:2181");
        assert!(!config.retry.fixed_delay);
        assert!(config.heartbeat.enabled);
        assert_eq!(config.payload.pool_size, 3);
        assert_eq!(config.quorum.min_ratio, 0.5);

        clear_bsp_env_vars();

        // Invalid values should be ignored (keep defaults)
        std::env::set_var("BSP_PAYLOAD_POOL_SIZE", "many");

        let config = CoordinatorConfig::default().with_env_overrides();
        assert_eq!(config.payload.pool_size, 8);

        clear_bsp_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = with_servers();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: CoordinatorConfig = toml_str.parse().unwrap();

        assert_eq!(original.store.servers, parsed.store.servers);
        assert_eq!(original.payload.pool_size, parsed.payload.pool_size);
        assert_eq!(original.quorum.min_ratio, parsed.quorum.min_ratio);
    }
}
