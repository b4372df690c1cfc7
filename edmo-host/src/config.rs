//! Host configuration.
//!
//! Loaded from a TOML file by the daemon; every field has a default so an
//! absent file or an empty section still yields a runnable configuration.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level host configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HostConfig {
    /// Serial transport settings.
    #[serde(default)]
    pub serial: SerialSection,
    /// UDP transport settings.
    #[serde(default)]
    pub udp: UdpSection,
    /// Session settings.
    #[serde(default)]
    pub session: SessionSection,
}

/// `[serial]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialSection {
    /// Whether the serial port scanner runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

/// `[udp]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct UdpSection {
    /// Whether the UDP broadcast poller runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Destination port robots listen on.
    #[serde(default = "default_udp_port")]
    pub port: u16,
    /// Broadcast poll cadence in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Peer silence budget in seconds before its channel closes.
    #[serde(default = "default_inactivity_timeout_s")]
    pub inactivity_timeout_s: u64,
}

impl Default for UdpSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_udp_port(),
            poll_interval_ms: default_poll_interval_ms(),
            inactivity_timeout_s: default_inactivity_timeout_s(),
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Hardware reconciliation cadence in milliseconds.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

impl HostConfig {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_udp_port() -> u16 {
    2121
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_inactivity_timeout_s() -> u64 {
    10
}

fn default_reconcile_interval_ms() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: HostConfig = toml::from_str("").unwrap();
        assert!(config.serial.enabled);
        assert!(config.udp.enabled);
        assert_eq!(config.udp.port, 2121);
        assert_eq!(config.udp.inactivity_timeout_s, 10);
        assert_eq!(config.session.reconcile_interval_ms, 50);
    }

    #[test]
    fn sections_override_independently() {
        let config: HostConfig = toml::from_str(
            r#"
            [udp]
            port = 4242
            inactivity_timeout_s = 30

            [serial]
            enabled = false
            "#,
        )
        .unwrap();
        assert!(!config.serial.enabled);
        assert_eq!(config.udp.port, 4242);
        assert_eq!(config.udp.inactivity_timeout_s, 30);
        assert_eq!(config.udp.poll_interval_ms, 1000);
    }
}
