//! Per-virtual-server configuration for the proxy core.
//!
//! Mirrors the configuration surface table in the design doc: master
//! enable, buffer size, relay idle timeout, pass-error-message policy, and
//! xclient. Loadable from TOML so the crate can be driven by a config file
//! the way the rest of the gateway is, with the same defaults.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub enable: bool,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub pass_error_message: bool,

    #[serde(default = "default_true")]
    pub xclient: bool,

    /// Timeout covering upstream connect + the full login handshake.
    /// The original core reuses the core server timeout for this; kept
    /// distinct here because relay and auth are armed on different sides
    /// (client read vs. upstream read) and confusing the two is a real bug
    /// class in this kind of proxy.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    /// Hostname this proxy presents to the backend in HELO/EHLO.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default)]
    pub tls: TlsUpstreamConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsUpstreamConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default)]
    pub verify: VerifyMode,
}

/// Upstream certificate verification policy (design §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// mode 0: no verification at all.
    #[default]
    None,
    /// mode 1: require a peer certificate and a verified chain.
    Required,
    /// mode 2: require a verified chain; peer certificate presence is not
    /// separately checked (TLS already guarantees the server sent one).
    ChainOnly,
    /// mode 3: accept a verified chain, or a chain whose only defect is a
    /// missing/unknown issuer.
    OptionalNoCa,
}

fn default_buffer_size() -> usize {
    4096
}

fn default_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_auth_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_server_name() -> String {
    "localhost".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: false,
            buffer_size: default_buffer_size(),
            timeout_secs: default_timeout_secs(),
            pass_error_message: false,
            xclient: true,
            auth_timeout_secs: default_auth_timeout_secs(),
            server_name: default_server_name(),
            tls: TlsUpstreamConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("failed to read config file: {e}")))?;
        toml::from_str(&content).map_err(|e| ProxyError::Config(format!("failed to parse config: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}
