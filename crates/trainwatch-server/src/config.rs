//! Server configuration loaded from JSON

use crate::bus::BusConfig;
use crate::error::ConfigError;
use crate::synthetic::SyntheticConfig;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use trainwatch_common::defaults::{
    default_history_capacity, default_listen_addr, default_max_subscribers,
    default_poll_timeout_ms, default_report_interval, default_shutdown_grace_secs,
    default_stream_buffer, default_subscriber_queue_capacity,
};

/// Training server configuration
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the gRPC server binds to
    #[serde(default = "default_listen_addr")]
    #[garde(skip)]
    pub listen_addr: SocketAddr,

    /// Report every Nth batch (the last batch of an epoch is always reported)
    #[serde(default = "default_report_interval")]
    #[garde(range(min = 1))]
    pub report_interval: u32,

    /// How long a stream loop waits for an event before re-checking its client
    #[serde(default = "default_poll_timeout_ms")]
    #[garde(range(min = 10, max = 60_000))]
    pub poll_timeout_ms: u64,

    /// Per-subscriber queue depth before the trainer blocks
    #[serde(default = "default_subscriber_queue_capacity")]
    #[garde(range(min = 1))]
    pub subscriber_queue_capacity: usize,

    /// Events of the current run kept for late subscribers (0 disables replay)
    #[serde(default = "default_history_capacity")]
    #[garde(skip)]
    pub history_capacity: usize,

    /// Concurrent `Subscribe` streams allowed
    #[serde(default = "default_max_subscribers")]
    #[garde(range(min = 1))]
    pub max_subscribers: usize,

    /// Outbound gRPC buffer per stream
    #[serde(default = "default_stream_buffer")]
    #[garde(range(min = 1))]
    pub stream_buffer: usize,

    /// How long shutdown waits for the active run to stop
    #[serde(default = "default_shutdown_grace_secs")]
    #[garde(skip)]
    pub shutdown_grace_secs: u64,

    /// Synthetic trainer parameters
    #[serde(default)]
    #[garde(dive)]
    pub trainer: SyntheticConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            report_interval: default_report_interval(),
            poll_timeout_ms: default_poll_timeout_ms(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            history_capacity: default_history_capacity(),
            max_subscribers: default_max_subscribers(),
            stream_buffer: default_stream_buffer(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            trainer: SyntheticConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            queue_capacity: self.subscriber_queue_capacity,
            history_capacity: self.history_capacity,
            max_subscribers: self.max_subscribers,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
