// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client configuration.
//!
//! Options serialize as JSON; every member has a default so partial
//! documents load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cluster::Cluster;
use crate::error::Result;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading a file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The configuration names no server address.
    #[error("no server address configured")]
    NoAddresses,
    /// Certificate or key material could not be used.
    #[error("tls configuration: {0}")]
    Tls(String),
}

/// Transport and behavior options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds.
    pub socket_timeout_ms: u64,
    /// Idle connections kept per node.
    pub pool_size_per_route: usize,
    /// Idle connections kept overall.
    pub pool_size_total: usize,
    /// Connection attempts per node before it counts as unreachable.
    pub retry_count: u32,
    /// Accept any server certificate.
    pub tls_skip_verify: bool,
    /// PEM file with an extra trusted CA certificate.
    pub tls_ca_certificate_path: Option<PathBuf>,
    /// PEM file with the client certificate and private key.
    pub tls_key_path: Option<PathBuf>,
    /// Skip the one-time server version check.
    pub skip_version_check: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            socket_timeout_ms: 300_000,
            pool_size_per_route: 10,
            pool_size_total: 100,
            retry_count: 3,
            tls_skip_verify: false,
            tls_ca_certificate_path: None,
            tls_key_path: None,
            skip_version_check: false,
        }
    }
}

impl ClientOptions {
    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout.
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}

/// Server addresses plus options, as stored in a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Node addresses in failover order.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Client options.
    #[serde(default)]
    pub options: ClientOptions,
}

impl ClientConfig {
    /// Parse a JSON document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes)?;
        if config.addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// The configured nodes.
    pub fn cluster(&self) -> Result<Cluster> {
        Cluster::from_addresses(&self.addresses)
    }
}
