//! WolfCommit Configuration
//!
//! This module provides configuration structures for a WolfCommit node.
//! Every field has a default, so an empty file describes the stock
//! seven-node cluster on ports 3001-3007.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::state::NodeAddr;

/// Main WolfCommit configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfCommitConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Host all cluster members listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// This node's port (the CLI `--port` flag takes precedence)
    #[serde(default)]
    pub port: Option<NodeAddr>,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Fixed membership list; the lowest port is the bootstrap coordinator
    #[serde(default = "default_ports")]
    pub ports: Vec<NodeAddr>,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Liveness probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Durable link connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay between reconnection attempts of a durable link
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Delay applied to prepare replies while the node is marked slow
    #[serde(default = "default_slow_delay_ms")]
    pub slow_delay_ms: u64,

    /// Upper bound on the prepare phase (unset = wait for every reply)
    #[serde(default)]
    pub prepare_timeout_ms: Option<u64>,

    /// Ports that boot with the active flag cleared
    #[serde(default)]
    pub inactive_on_start: Vec<NodeAddr>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ports() -> Vec<NodeAddr> {
    (3001..=3007).collect()
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_slow_delay_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            slow_delay_ms: default_slow_delay_ms(),
            prepare_timeout_ms: None,
            inactive_on_start: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClusterConfig {
    /// Membership list sorted ascending
    pub fn sorted_ports(&self) -> Vec<NodeAddr> {
        let mut ports = self.ports.clone();
        ports.sort_unstable();
        ports
    }

    /// The well-known bootstrap coordinator (lowest configured port)
    pub fn bootstrap_coordinator(&self) -> Option<NodeAddr> {
        self.ports.iter().copied().min()
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Get probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get reconnect interval as Duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Get the slow-participant delay as Duration
    pub fn slow_delay(&self) -> Duration {
        Duration::from_millis(self.slow_delay_ms)
    }

    /// Get the optional prepare bound as Duration
    pub fn prepare_timeout(&self) -> Option<Duration> {
        self.prepare_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the cluster section
    pub fn validate(&self) -> crate::Result<()> {
        if self.ports.is_empty() {
            return Err(crate::Error::Config("cluster.ports cannot be empty".into()));
        }

        let mut seen = HashSet::new();
        for port in &self.ports {
            if !seen.insert(*port) {
                return Err(crate::Error::Config(format!(
                    "cluster.ports contains {} more than once",
                    port
                )));
            }
        }

        for port in &self.inactive_on_start {
            if !seen.contains(port) {
                return Err(crate::Error::Config(format!(
                    "cluster.inactive_on_start lists {} which is not a cluster member",
                    port
                )));
            }
        }

        let intervals = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("slow_delay_ms", self.slow_delay_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(crate::Error::Config(format!("cluster.{} must be non-zero", name)));
            }
        }

        if self.prepare_timeout_ms == Some(0) {
            return Err(crate::Error::Config(
                "cluster.prepare_timeout_ms must be non-zero when set".into(),
            ));
        }

        Ok(())
    }
}

impl WolfCommitConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfCommitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.host.is_empty() {
            return Err(crate::Error::Config("node.host cannot be empty".into()));
        }

        self.cluster.validate()?;

        if let Some(port) = self.node.port {
            self.ensure_member(port)?;
        }

        Ok(())
    }

    /// Check that `port` is part of the fixed membership list
    pub fn ensure_member(&self, port: NodeAddr) -> crate::Result<()> {
        if self.cluster.ports.contains(&port) {
            Ok(())
        } else {
            Err(crate::Error::Config(format!(
                "port {} is not listed in cluster.ports",
                port
            )))
        }
    }

    /// Resolve this node's port: CLI override first, then the config file
    pub fn resolve_port(&self, cli_port: Option<NodeAddr>) -> crate::Result<NodeAddr> {
        let port = cli_port
            .or(self.node.port)
            .ok_or_else(|| crate::Error::Config("no node port given (use --port or node.port)".into()))?;
        self.ensure_member(port)?;
        Ok(port)
    }

    /// Render a commented default configuration file
    pub fn default_toml() -> String {
        let ports = default_ports()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"# WolfCommit node configuration

[node]
host = "{host}"
# port = 3001            # usually given with --port

[cluster]
# Fixed membership; the lowest port bootstraps as coordinator
ports = [{ports}]
heartbeat_interval_ms = {heartbeat}
probe_timeout_ms = {probe}
connect_timeout_ms = {connect}
reconnect_interval_ms = {reconnect}
slow_delay_ms = {slow}
# prepare_timeout_ms = 10000   # unset: wait for every prepare reply
inactive_on_start = []

[logging]
level = "{level}"
format = "{format}"
"#,
            host = default_host(),
            ports = ports,
            heartbeat = default_heartbeat_interval_ms(),
            probe = default_probe_timeout_ms(),
            connect = default_connect_timeout_ms(),
            reconnect = default_reconnect_interval_ms(),
            slow = default_slow_delay_ms(),
            level = default_log_level(),
            format = default_log_format(),
        )
    }
}
