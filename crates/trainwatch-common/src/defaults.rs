//! Default configuration values shared between server and client
//!
//! These constants keep the server binary, the client CLI and the tests on
//! the same defaults.

/// Number of epochs used when a start request asks for zero
pub const DEFAULT_EPOCHS: u32 = 3;

/// Default gRPC port for the training server
pub const DEFAULT_GRPC_PORT: u16 = 50051;

/// Default client endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:50051";

/// Report every Nth batch (plus the last batch of each epoch)
pub const DEFAULT_REPORT_INTERVAL: u32 = 160;

/// How long a stream loop waits on the bus before re-checking its client (ms)
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

/// Per-subscriber queue depth before the producer blocks
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Events of the current run retained for late subscribers
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Upper bound on concurrently attached subscribers
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 16;

/// Outbound gRPC stream buffer per subscriber
pub const DEFAULT_STREAM_BUFFER: usize = 32;

/// Grace period for the active run and streams at shutdown (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Client: attempts per control call
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Client: base delay of the exponential backoff (ms)
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Client: cap on a single backoff delay (seconds)
pub const DEFAULT_MAX_DELAY_SECS: u64 = 60;

/// Client: per-request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client: connection timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

// Serde default functions for struct field defaults

/// Returns the default listen address
pub fn default_listen_addr() -> std::net::SocketAddr {
    std::net::SocketAddr::from(([0, 0, 0, 0], DEFAULT_GRPC_PORT))
}

/// Returns the default reporting interval
pub fn default_report_interval() -> u32 {
    DEFAULT_REPORT_INTERVAL
}

/// Returns the default poll timeout in milliseconds
pub fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

/// Returns the default subscriber queue capacity
pub fn default_subscriber_queue_capacity() -> usize {
    DEFAULT_SUBSCRIBER_QUEUE_CAPACITY
}

/// Returns the default replay history capacity
pub fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

/// Returns the default subscriber limit
pub fn default_max_subscribers() -> usize {
    DEFAULT_MAX_SUBSCRIBERS
}

/// Returns the default outbound stream buffer
pub fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

/// Returns the default shutdown grace period in seconds
pub fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr_matches_port() {
        assert_eq!(default_listen_addr().port(), DEFAULT_GRPC_PORT);
        assert!(default_listen_addr().ip().is_unspecified());
    }
}
