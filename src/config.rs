//! Configuration management for the 2PC node
//!
//! Handles loading and validation of node configuration from a TOML file,
//! with environment variable overrides, mirroring the layering used by the
//! original settings module this crate replaces.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Helper module for deserializing Duration from milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Role this node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Coordinator,
    Participant,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Coordinator => "coordinator",
            NodeRole::Participant => "participant",
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coordinator" => Ok(NodeRole::Coordinator),
            "participant" => Ok(NodeRole::Participant),
            other => Err(Error::config(format!("unknown node role: {other}"))),
        }
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub timing: TimingConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub failure_injection_enabled: bool,
}

/// Identity and network settings for this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub role: NodeRole,
    pub port: u16,
    /// Path to the node topology file (`nodes.json`).
    pub nodes_file: String,
}

/// Tunables governing the 2PC state machine, named per the external
/// interface table: prepare/commit deadlines, heartbeat cadence, and the
/// lock-acquire ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(with = "duration_millis")]
    pub prepare_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub commit_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub lock_timeout: Duration,
    pub max_concurrent_transactions: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl NodeConfig {
    /// Schema this node's connections should set `search_path` to:
    /// `public` for the coordinator, the node id for a participant.
    pub fn schema_name(&self) -> &str {
        match self.role {
            NodeRole::Coordinator => "public",
            NodeRole::Participant => &self.node_id,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                node_id: String::new(),
                role: NodeRole::Participant,
                port: 8086,
                nodes_file: "nodes.json".to_string(),
            },
            timing: TimingConfig {
                prepare_timeout: Duration::from_millis(5000),
                commit_timeout: Duration::from_millis(3000),
                heartbeat_interval: Duration::from_millis(2000),
                heartbeat_timeout: Duration::from_millis(5000),
                lock_timeout: Duration::from_millis(3000),
                max_concurrent_transactions: 10,
            },
            storage: StorageConfig {
                database_url: String::new(),
                max_connections: 10,
            },
            failure_injection_enabled: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides, then validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("reading config file: {e}")))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::config(format!("parsing config file: {e}")))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration purely from environment variables, starting
    /// from defaults. Used when no config file is supplied.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TWOPC_*` environment variable overrides on top of whatever
    /// was loaded from file (or the defaults).
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("TWOPC_NODE_ID") {
            self.node.node_id = v;
        }
        if let Ok(v) = std::env::var("TWOPC_NODE_ROLE") {
            self.node.role = v.parse()?;
        }
        if let Ok(v) = std::env::var("TWOPC_PORT") {
            self.node.port = v
                .parse()
                .map_err(|e| Error::config(format!("TWOPC_PORT: {e}")))?;
        }
        if let Ok(v) = std::env::var("TWOPC_NODES_FILE") {
            self.node.nodes_file = v;
        }
        if let Ok(v) = std::env::var("TWOPC_DATABASE_URL") {
            self.storage.database_url = v;
        }
        if let Ok(v) = std::env::var("TWOPC_PREPARE_TIMEOUT_MS") {
            self.timing.prepare_timeout = Duration::from_millis(
                v.parse()
                    .map_err(|e| Error::config(format!("TWOPC_PREPARE_TIMEOUT_MS: {e}")))?,
            );
        }
        if let Ok(v) = std::env::var("TWOPC_COMMIT_TIMEOUT_MS") {
            self.timing.commit_timeout = Duration::from_millis(
                v.parse()
                    .map_err(|e| Error::config(format!("TWOPC_COMMIT_TIMEOUT_MS: {e}")))?,
            );
        }
        if let Ok(v) = std::env::var("TWOPC_LOCK_TIMEOUT_MS") {
            self.timing.lock_timeout = Duration::from_millis(
                v.parse()
                    .map_err(|e| Error::config(format!("TWOPC_LOCK_TIMEOUT_MS: {e}")))?,
            );
        }
        if let Ok(v) = std::env::var("TWOPC_FAILURE_INJECTION_ENABLED") {
            self.failure_injection_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Validate configuration values. Fatal if this fails at startup.
    pub fn validate(&self) -> Result<()> {
        if self.storage.database_url.is_empty() {
            return Err(Error::config("storage.database_url must be set"));
        }
        if self.node.node_id.is_empty() {
            return Err(Error::config("node.node_id must be set"));
        }
        if self.node.port == 0 {
            return Err(Error::config("node.port must be greater than 0"));
        }
        if self.timing.max_concurrent_transactions == 0 {
            return Err(Error::config(
                "timing.max_concurrent_transactions must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Save configuration to file. Used by tests and operator tooling.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::config(format!("{e}")))?;
        std::fs::write(path, content).map_err(|e| Error::config(format!("{e}")))?;
        Ok(())
    }
}
