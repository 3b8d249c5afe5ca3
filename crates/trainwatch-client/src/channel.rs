//! gRPC channel building

use anyhow::{Context, Result};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use trainwatch_common::defaults::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Options for building a gRPC channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout for unary calls
    pub request_timeout: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        }
    }
}

impl ChannelOptions {
    /// Options for a channel that carries a long-lived stream
    pub fn for_streaming() -> Self {
        Self {
            request_timeout: None,
            ..Self::default()
        }
    }

    /// Quick connect options for polling (shorter timeouts)
    pub fn for_polling() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// gRPC channel builder for a plaintext `http://host:port` endpoint
pub struct GrpcChannelBuilder {
    endpoint: String,
    options: ChannelOptions,
}

impl GrpcChannelBuilder {
    /// Create a builder for a full endpoint URL such as `http://127.0.0.1:50051`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            options: ChannelOptions::default(),
        }
    }

    /// Create a builder for the given host and port
    pub fn from_host(host: &str, port: u16) -> Self {
        Self::new(format!("http://{}:{}", host, port))
    }

    /// Set custom channel options
    pub fn with_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn configure(&self) -> Result<Endpoint> {
        let mut endpoint = Channel::from_shared(self.endpoint.clone())
            .with_context(|| format!("Invalid endpoint '{}'", self.endpoint))?
            .connect_timeout(self.options.connect_timeout);
        if let Some(timeout) = self.options.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        Ok(endpoint)
    }

    /// Build a channel that connects on first use.
    ///
    /// Connection failures then surface per call as `UNAVAILABLE`, which the
    /// retry layer treats as transient.
    pub fn connect_lazy(self) -> Result<Channel> {
        Ok(self.configure()?.connect_lazy())
    }
}
