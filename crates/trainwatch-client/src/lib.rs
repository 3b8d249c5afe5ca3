//! trainwatch-client - Client for the trainwatch training server
//!
//! Control calls (`status`, `start`) are retried on transient transport
//! failures with exponential backoff; the metric stream is not.

pub mod channel;
pub mod client;
pub mod retry;
pub mod watch;

pub use channel::{ChannelOptions, GrpcChannelBuilder};
pub use client::RetryingClient;
pub use retry::{RetryPolicy, is_transient};
pub use watch::{MetricOutput, WatchEnd, WatchOptions, WatchSummary, watch};
