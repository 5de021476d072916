//! Configuration loading for peerboxd.
//!
//! Configuration is loaded from a TOML file (default: `peerbox.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use peerbox_core::ProtocolConfig;
use peerbox_types::{AddressParseError, PeerAddress};
use serde::Deserialize;

/// Root configuration for peerboxd.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Identity and peering configuration.
    pub node: NodeConfig,
    /// Share root and transfer configuration.
    pub sync: SyncConfig,
    /// Capacity and timeout configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Identity and peering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Host name advertised to peers during handshakes.
    pub advertised_host: String,
    /// TCP port to listen on, also the advertised port.
    pub port: u16,
    /// Peers to connect to at startup, as `host:port` strings.
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Share root and transfer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Directory whose content is kept in sync.
    pub root: PathBuf,
    /// Maximum byte-range length per transfer request (default: 8192).
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Seconds between share-root scans (default: 5).
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

/// Capacity and timeout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrently admitted peers (default: 10).
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Seconds a new connection may take to handshake (default: 10).
    /// Connections that don't handshake within this time are dropped.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Seconds of silence before an in-flight transfer is abandoned
    /// (default: 30).
    #[serde(default = "default_transfer_idle_timeout_secs")]
    pub transfer_idle_timeout_secs: u64,
    /// Retries of a failed byte range before giving up (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Protocol violations tolerated per connection (default: 5).
    #[serde(default = "default_max_protocol_violations")]
    pub max_protocol_violations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_peers: default_max_peers(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            transfer_idle_timeout_secs: default_transfer_idle_timeout_secs(),
            max_retries: default_max_retries(),
            max_protocol_violations: default_max_protocol_violations(),
        }
    }
}

// Default value functions
fn default_block_size() -> u64 {
    8192
}

fn default_scan_interval_secs() -> u64 {
    5
}

fn default_max_peers() -> usize {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_transfer_idle_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_protocol_violations() -> u32 {
    5
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The configuration file path.
        path: PathBuf,
        /// The OS error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A `peers` entry is not a `host:port` string.
    #[error("invalid peer address {value:?}: {source}")]
    InvalidPeer {
        /// The offending entry.
        value: String,
        /// The parse failure.
        #[source]
        source: AddressParseError,
    },
}

impl Config {
    /// Load and parse the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        // Fail at startup, not at connect time.
        config.bootstrap_peers()?;
        Ok(config)
    }

    /// The address this node advertises during handshakes.
    pub fn advertised(&self) -> PeerAddress {
        PeerAddress::new(self.node.advertised_host.clone(), self.node.port)
    }

    /// The parsed startup peer list.
    pub fn bootstrap_peers(&self) -> Result<Vec<PeerAddress>, ConfigError> {
        self.node
            .peers
            .iter()
            .map(|value| {
                value.parse().map_err(|source| ConfigError::InvalidPeer {
                    value: value.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Per-connection dispatcher tuning derived from this configuration.
    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            block_size: self.sync.block_size,
            max_retries: self.limits.max_retries,
            transfer_idle_timeout: Duration::from_secs(self.limits.transfer_idle_timeout_secs),
            max_violations: self.limits.max_protocol_violations,
        }
    }

    /// How long a fresh connection may take to handshake.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.handshake_timeout_secs)
    }

    /// Delay between share-root scans.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.sync.scan_interval_secs)
    }
}
