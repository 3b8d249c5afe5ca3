//! Retry policy for control calls
//!
//! Transient failures (`UNAVAILABLE`, `DEADLINE_EXCEEDED`) are retried with
//! exponential backoff: the wait before retry `n` (zero-based) is
//! `base_delay * 2^n`, capped at `max_delay`. Anything else, and the final
//! failure once attempts run out, is returned unchanged.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tonic::{Code, Status};
use tracing::warn;
use trainwatch_common::defaults::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_RETRIES,
};

/// How control calls are retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first
    pub max_retries: u32,
    /// Wait before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
    /// Randomize waits; off keeps the schedule deterministic
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries.saturating_sub(1) as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `call` under this policy. `rpc` names the call in log output.
    pub async fn run<T, F, Fut>(&self, rpc: &str, call: F) -> Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        call.retry(self.backoff())
            .when(is_transient)
            .notify(|status: &Status, delay: Duration| {
                warn!(
                    rpc,
                    code = ?status.code(),
                    error = %status.message(),
                    delay = ?delay,
                    "Control call failed, retrying..."
                );
            })
            .await
    }
}

/// Whether a failed call is worth retrying
pub fn is_transient(status: &Status) -> bool {
    matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded)
}
