//! Configuration management

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default outgoing-write throttle interval in milliseconds
pub const DEFAULT_THROTTLE_MS: u64 = 250;

/// Per-connection throttle setting
///
/// Deserializes from `false`/`true` or a plain number of milliseconds, the
/// same short forms the configuration file uses for the `throttling` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ThrottleSetting {
    /// Explicitly enable (default interval) or disable throttling
    Flag(bool),
    /// Throttle with a specific refill interval in milliseconds
    IntervalMs(u64),
    /// Use the client-wide default
    #[serde(skip)]
    Inherit,
}

impl Default for ThrottleSetting {
    fn default() -> Self {
        ThrottleSetting::Inherit
    }
}

impl ThrottleSetting {
    /// Resolve to a refill interval, `None` meaning throttling is disabled
    pub fn resolve(&self, client_default: Option<Duration>) -> Option<Duration> {
        match self {
            ThrottleSetting::Inherit => client_default,
            ThrottleSetting::Flag(false) => None,
            ThrottleSetting::Flag(true) => Some(Duration::from_millis(DEFAULT_THROTTLE_MS)),
            ThrottleSetting::IntervalMs(ms) => Some(Duration::from_millis(*ms)),
        }
    }
}

/// SASL credentials for a network
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaslConfig {
    /// Account name; defaults to the network username when absent
    pub account: Option<String>,
    /// Account password
    pub password: Option<String>,
}

/// NickServ identification credentials for a network
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NickservConfig {
    /// Services account name
    pub username: Option<String>,
    /// Services password
    pub password: Option<String>,
}

/// Configuration for a single network connection
///
/// Empty strings and a zero port mean "unset"; the owning protocol's `parse`
/// fills in the documented defaults before the connection is registered.
/// Unrecognized keys in a configuration file are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    /// Server hostname; required, must be non-empty after parsing
    #[serde(default)]
    pub host: String,
    /// Server port; defaults to 6697 with TLS, 6667 without
    #[serde(default)]
    pub port: u16,
    /// Connect over TLS
    #[serde(default)]
    pub tls: bool,
    /// Accept invalid/self-signed TLS certificates
    #[serde(default)]
    pub tls_allow_invalid: bool,
    /// Nickname; defaults to a generated one
    #[serde(default)]
    pub nick: String,
    /// Username; defaults to the nickname
    #[serde(default)]
    pub username: String,
    /// Real name; defaults to the nickname
    #[serde(default)]
    pub realname: String,
    /// Server password sent before registration
    pub password: Option<String>,
    /// Outgoing-write throttling for this connection
    #[serde(default)]
    pub throttling: ThrottleSetting,
    /// SASL authentication credentials
    pub sasl: Option<SaslConfig>,
    /// NickServ identification credentials
    pub nickserv: Option<NickservConfig>,
    /// Explicit connection identifier
    pub name: Option<String>,
    /// Protocol name; empty means the default protocol
    #[serde(default)]
    pub protocol: String,
}

impl NetworkConfig {
    /// Create a configuration for a plain host, everything else defaulted
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }
}

/// Top-level client configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Client-wide default throttling, overridable per network
    #[serde(default)]
    pub throttling: ThrottleSetting,
    /// Networks to connect to at startup
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }
}
