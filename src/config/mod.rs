//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`LIME_*`)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LimeError, Result};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimeConfig {
    /// Channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,

    /// HTTP emulation listener configuration
    #[serde(default)]
    pub listener: ListenerConfig,
}

impl LimeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| LimeError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| LimeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LIME_CHANNEL_QUEUE_CAPACITY") {
            if let Ok(val) = val.parse() {
                config.channel.queue_capacity = val;
            }
        }
        if let Ok(val) = std::env::var("LIME_CHANNEL_NEGOTIATION_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                config.channel.negotiation_timeout_secs = val;
            }
        }
        if let Ok(val) = std::env::var("LIME_CHANNEL_REMOTE_IDLE_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                config.channel.remote_idle_timeout_secs = Some(val);
            }
        }
        if let Ok(domain) = std::env::var("LIME_LISTENER_DOMAIN") {
            config.listener.domain = domain;
        }
        if let Ok(val) = std::env::var("LIME_LISTENER_REQUEST_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                config.listener.request_timeout_secs = val;
            }
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        let channel_defaults = ChannelConfig::default();
        let listener_defaults = ListenerConfig::default();
        Self {
            channel: ChannelConfig {
                queue_capacity: if other.channel.queue_capacity != channel_defaults.queue_capacity
                {
                    other.channel.queue_capacity
                } else {
                    self.channel.queue_capacity
                },
                negotiation_timeout_secs: if other.channel.negotiation_timeout_secs
                    != channel_defaults.negotiation_timeout_secs
                {
                    other.channel.negotiation_timeout_secs
                } else {
                    self.channel.negotiation_timeout_secs
                },
                remote_idle_timeout_secs: other
                    .channel
                    .remote_idle_timeout_secs
                    .or(self.channel.remote_idle_timeout_secs),
                ping_timeout_secs: if other.channel.ping_timeout_secs
                    != channel_defaults.ping_timeout_secs
                {
                    other.channel.ping_timeout_secs
                } else {
                    self.channel.ping_timeout_secs
                },
            },
            listener: ListenerConfig {
                domain: if other.listener.domain != listener_defaults.domain {
                    other.listener.domain
                } else {
                    self.listener.domain
                },
                request_timeout_secs: if other.listener.request_timeout_secs
                    != listener_defaults.request_timeout_secs
                {
                    other.listener.request_timeout_secs
                } else {
                    self.listener.request_timeout_secs
                },
                write_exceptions_to_output: other.listener.write_exceptions_to_output
                    || self.listener.write_exceptions_to_output,
                max_body_size: if other.listener.max_body_size != listener_defaults.max_body_size {
                    other.listener.max_body_size
                } else {
                    self.listener.max_body_size
                },
            },
        }
    }
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Capacity of each inbound envelope queue
    pub queue_capacity: usize,

    /// Deadline for each session negotiation step, in seconds
    pub negotiation_timeout_secs: u64,

    /// Idle time without inbound envelopes before a `/ping` probe is sent
    pub remote_idle_timeout_secs: Option<u64>,

    /// Deadline for the `/ping` response, in seconds
    pub ping_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            negotiation_timeout_secs: crate::session::NEGOTIATION_TIMEOUT_SECS,
            remote_idle_timeout_secs: None,
            ping_timeout_secs: 30,
        }
    }
}

impl ChannelConfig {
    /// Negotiation step deadline
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    /// Idle threshold for the liveness probe
    pub fn remote_idle_timeout(&self) -> Option<Duration> {
        self.remote_idle_timeout_secs.map(Duration::from_secs)
    }

    /// Deadline for the liveness probe response
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Set the inbound queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the negotiation step deadline
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout_secs = timeout.as_secs();
        self
    }

    /// Enable the liveness probe
    pub fn with_remote_idle_timeout(mut self, timeout: Duration) -> Self {
        self.remote_idle_timeout_secs = Some(timeout.as_secs());
        self
    }
}

/// HTTP emulation listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Domain of the nodes authenticated through the listener
    pub domain: String,

    /// Per-request deadline, in seconds
    pub request_timeout_secs: u64,

    /// Include stringified errors in 5xx response bodies
    pub write_exceptions_to_output: bool,

    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            request_timeout_secs: 60,
            write_exceptions_to_output: false,
            max_body_size: 1024 * 1024, // 1 MB
        }
    }
}

impl ListenerConfig {
    /// Per-request deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Set the authentication domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the per-request deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Include stringified errors in 5xx bodies
    pub fn with_exceptions_to_output(mut self) -> Self {
        self.write_exceptions_to_output = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LimeConfig::default();
        assert_eq!(config.channel.queue_capacity, 1);
        assert_eq!(config.channel.negotiation_timeout_secs, 60);
        assert!(config.channel.remote_idle_timeout_secs.is_none());
        assert_eq!(config.listener.request_timeout_secs, 60);
        assert!(!config.listener.write_exceptions_to_output);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [channel]
            queue_capacity = 8
            negotiation_timeout_secs = 10
            remote_idle_timeout_secs = 120
            ping_timeout_secs = 15

            [listener]
            domain = "example.org"
            request_timeout_secs = 30
            write_exceptions_to_output = true
            max_body_size = 65536
        "#;

        let config: LimeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.channel.queue_capacity, 8);
        assert_eq!(config.channel.remote_idle_timeout_secs, Some(120));
        assert_eq!(config.listener.domain, "example.org");
        assert!(config.listener.write_exceptions_to_output);
    }

    #[test]
    fn test_merge_prefers_non_default_values() {
        let base = LimeConfig {
            channel: ChannelConfig::default().with_queue_capacity(4),
            listener: ListenerConfig::default().with_domain("base.org"),
        };
        let overlay = LimeConfig {
            listener: ListenerConfig::default().with_domain("overlay.org"),
            ..Default::default()
        };

        let merged = base.merge(overlay);
        assert_eq!(merged.channel.queue_capacity, 4);
        assert_eq!(merged.listener.domain, "overlay.org");
    }
}
