//! gRPC service: run control and metric streaming

use crate::bus::{BusError, MetricBus};
use crate::controller::{ControllerError, RunController};
use crate::stream::SubscriberLoop;
use anyhow::Result;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info};
use trainwatch_common::proto::{
    StartRequest, StartResponse, StatusRequest, StatusResponse, SubscribeRequest, Training,
    TrainingMetric, TrainingServer,
};

impl From<BusError> for Status {
    fn from(e: BusError) -> Self {
        match e {
            BusError::TooManySubscribers(_) => Status::resource_exhausted(e.to_string()),
            BusError::Closed => Status::unavailable(e.to_string()),
        }
    }
}

impl From<ControllerError> for Status {
    fn from(e: ControllerError) -> Self {
        match e {
            ControllerError::ShuttingDown => Status::unavailable(e.to_string()),
        }
    }
}

/// gRPC service implementation backed by a [`RunController`] and a [`MetricBus`]
pub struct TrainingService {
    controller: Arc<RunController>,
    bus: Arc<MetricBus>,
    poll_timeout: Duration,
    stream_buffer: usize,
    shutdown_token: CancellationToken,
}

impl TrainingService {
    pub fn new(
        controller: Arc<RunController>,
        bus: Arc<MetricBus>,
        poll_timeout: Duration,
        stream_buffer: usize,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            controller,
            bus,
            poll_timeout,
            stream_buffer: stream_buffer.max(1),
            shutdown_token,
        }
    }
}

type MetricStream = Pin<Box<dyn Stream<Item = Result<TrainingMetric, Status>> + Send>>;

#[tonic::async_trait]
impl Training for TrainingService {
    type SubscribeStream = MetricStream;

    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let status = self.controller.status().await;

        Ok(Response::new(StatusResponse {
            state: status.phase.to_string(),
            message: status.message,
            current_epoch: status.current_epoch,
            epochs_requested: status.epochs_requested,
            last_outcome: status
                .last_outcome
                .map(|outcome| outcome.to_string())
                .unwrap_or_default(),
            subscribers: u32::try_from(self.bus.subscriber_count()).unwrap_or(u32::MAX),
        }))
    }

    async fn start(
        &self,
        request: Request<StartRequest>,
    ) -> Result<Response<StartResponse>, Status> {
        let req = request.into_inner();

        let epochs = u32::try_from(req.num_epochs).map_err(|_| {
            Status::invalid_argument(format!(
                "num_epochs must be non-negative, got {}",
                req.num_epochs
            ))
        })?;

        let outcome = self.controller.start(epochs, req.confirmed).await?;
        debug!(
            requested = req.num_epochs,
            confirmed = req.confirmed,
            status = %outcome.status,
            "Start request handled"
        );

        Ok(Response::new(StartResponse {
            status: outcome.status.to_string(),
            message: outcome.message,
            epochs: outcome.epochs,
        }))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let remote = request.remote_addr();
        let subscription = self.bus.subscribe()?;

        info!(
            subscriber = subscription.id(),
            remote = ?remote,
            "Client subscribed to metrics"
        );

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let stream_loop =
            SubscriberLoop::new(subscription, tx, self.poll_timeout, self.shutdown_token.clone());
        tokio::spawn(stream_loop.run());

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// Configuration for running the gRPC server
pub struct GrpcServerConfig {
    pub addr: SocketAddr,
    pub controller: Arc<RunController>,
    pub bus: Arc<MetricBus>,
    pub poll_timeout: Duration,
    pub stream_buffer: usize,
    pub shutdown_token: CancellationToken,
}

/// Run the gRPC server until `shutdown_token` is cancelled
pub async fn run_grpc_server(config: GrpcServerConfig) -> Result<()> {
    let GrpcServerConfig {
        addr,
        controller,
        bus,
        poll_timeout,
        stream_buffer,
        shutdown_token,
    } = config;

    let service = TrainingService::new(
        controller,
        bus,
        poll_timeout,
        stream_buffer,
        shutdown_token.clone(),
    );

    info!(%addr, "Starting gRPC server");
    tonic::transport::Server::builder()
        .add_service(TrainingServer::new(service))
        .serve_with_shutdown(addr, shutdown_token.cancelled_owned())
        .await?;

    info!("gRPC server shut down gracefully");
    Ok(())
}
