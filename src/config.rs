//! Configuration management for the exchange peers

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::params::NamedGroup;

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Exchange settings
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host the client connects to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the server listens on and the client connects to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout in seconds (0 disables)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per read/write timeout in seconds (0 blocks until data or closure)
    #[serde(default)]
    pub io_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Diffie-Hellman group; both peers must agree
    #[serde(default)]
    pub group: NamedGroup,

    /// Message the client sends
    #[serde(default = "default_message")]
    pub message: String,

    /// Log the raw shared secret at DEBUG
    #[serde(default)]
    pub log_secret: bool,
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_connect_timeout() -> u64 { 30 }
fn default_message() -> String { "Hello, Server!".to_string() }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            io_timeout_secs: 0,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            group: NamedGroup::default(),
            message: default_message(),
            log_secret: false,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.io_timeout_secs)
    }
}

fn secs_to_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Load configuration from a file
pub fn load(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        // Assume TOML if not JSON
        toml::from_str(&content)?
    };

    Ok(config)
}

/// Save configuration to a file
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "json") {
        serde_json::to_string_pretty(config)?
    } else {
        toml::to_string_pretty(config)?
    };

    fs::write(path, content)?;
    Ok(())
}

/// Generate a sample configuration file
pub fn generate_sample() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_default()
}
