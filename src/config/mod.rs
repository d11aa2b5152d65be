//! Configuration module

use crate::crypto::CipherKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shadowsocks server host
    pub server: String,

    /// Shadowsocks server port
    #[serde(rename = "server-port")]
    pub server_port: u16,

    /// Password shared with the server
    pub password: String,

    /// AEAD cipher method (aes-128-gcm, aes-256-gcm, chacha20-ietf-poly1305)
    pub method: String,

    /// Local SOCKS5 port
    #[serde(rename = "local-port")]
    pub local_port: u16,

    /// Connect and idle timeout in seconds
    pub timeout: u64,

    /// Log level
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Read {} failed: {}", path, e)))?;
        Self::from_str(&content)
    }

    /// Load from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(Error::config("Missing server address"));
        }
        if self.password.is_empty() {
            return Err(Error::config("Missing password"));
        }
        CipherKind::try_from(self.method.as_str())?;
        if self.timeout == 0 {
            return Err(Error::config("Timeout must be at least 1 second"));
        }
        Ok(())
    }

    /// The cipher suite named by `method`
    pub fn cipher(&self) -> Result<CipherKind> {
        CipherKind::try_from(self.method.as_str())
    }

    /// Connect/idle deadline as a Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: String::new(),
            server_port: 8388,
            password: String::new(),
            method: "aes-256-gcm".to_string(),
            local_port: 1080,
            timeout: 60,
            log_level: None,
        }
    }
}
