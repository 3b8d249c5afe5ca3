//! Training server client with retried control calls

use crate::channel::{ChannelOptions, GrpcChannelBuilder};
use crate::retry::RetryPolicy;
use anyhow::{Result, bail};
use std::time::{Duration, Instant};
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};
use trainwatch_common::proto::{
    StartRequest, StartResponse, StatusRequest, StatusResponse, SubscribeRequest, TrainingClient,
    TrainingMetric,
};

/// Client for the training server.
///
/// `status` and `start` are retried on transient failures according to the
/// [`RetryPolicy`]; `subscribe` is not. Each control attempt is bounded by
/// the request timeout independently of the channel, so a stream channel
/// without a channel-level deadline still has bounded control calls.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    inner: TrainingClient<Channel>,
    policy: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl RetryingClient {
    /// Wrap an existing channel
    pub fn new(channel: Channel, policy: RetryPolicy) -> Self {
        Self {
            inner: TrainingClient::new(channel),
            policy,
            request_timeout: None,
        }
    }

    /// Bound every `status` and `start` attempt by `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build a client for `endpoint`. The connection is made on first use, so
    /// an unreachable server is retried like any other transient failure.
    pub fn connect(endpoint: &str, options: ChannelOptions, policy: RetryPolicy) -> Result<Self> {
        let channel = GrpcChannelBuilder::new(endpoint)
            .with_options(options)
            .connect_lazy()?;
        Ok(Self::new(channel, policy))
    }

    /// Current server state
    pub async fn status(&self) -> Result<StatusResponse, Status> {
        self.policy
            .run("status", || {
                let mut client = self.inner.clone();
                let timeout = self.request_timeout;
                async move {
                    let request = bounded_request(StatusRequest {}, timeout);
                    within(timeout, "status", client.status(request)).await
                }
            })
            .await
    }

    /// Request a run of `num_epochs` epochs (0 selects the server default)
    pub async fn start(&self, num_epochs: i32, confirmed: bool) -> Result<StartResponse, Status> {
        self.policy
            .run("start", || {
                let mut client = self.inner.clone();
                let timeout = self.request_timeout;
                async move {
                    let request = bounded_request(
                        StartRequest {
                            num_epochs,
                            confirmed,
                        },
                        timeout,
                    );
                    within(timeout, "start", client.start(request)).await
                }
            })
            .await
    }

    /// Open the metric stream. Not retried.
    pub async fn subscribe(&self) -> Result<Streaming<TrainingMetric>, Status> {
        let mut client = self.inner.clone();
        Ok(client.subscribe(SubscribeRequest {}).await?.into_inner())
    }

    /// Poll `status` until the server answers or `max_wait` elapses
    pub async fn wait_for_ready(&self, max_wait: Duration) -> Result<StatusResponse> {
        let start = Instant::now();
        let mut delay = Duration::from_millis(100);
        let max_delay = Duration::from_secs(5);

        loop {
            let mut client = self.inner.clone();
            let request = bounded_request(StatusRequest {}, self.request_timeout);
            match within(self.request_timeout, "status", client.status(request)).await {
                Ok(status) => {
                    info!(
                        state = %status.state,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Server is ready"
                    );
                    return Ok(status);
                }
                Err(e) => {
                    if start.elapsed() >= max_wait {
                        bail!("Server not ready after {:?}: {}", max_wait, e.message());
                    }
                    debug!(
                        error = %e.message(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Server not ready yet"
                    );
                }
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(max_delay);
        }
    }
}

/// Attach `timeout` as the request's gRPC deadline
fn bounded_request<T>(message: T, timeout: Option<Duration>) -> Request<T> {
    let mut request = Request::new(message);
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    request
}

/// Await a unary call, failing with `DEADLINE_EXCEEDED` once `timeout` elapses.
///
/// The deadline also covers connection setup on a lazy channel.
async fn within<T>(
    timeout: Option<Duration>,
    rpc: &str,
    call: impl Future<Output = Result<Response<T>, Status>>,
) -> Result<T, Status> {
    let response = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, call).await.map_err(|_| {
            Status::deadline_exceeded(format!("{rpc} timed out after {timeout:?}"))
        })??,
        None => call.await?,
    };
    Ok(response.into_inner())
}
