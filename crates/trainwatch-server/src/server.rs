//! Server assembly: bus, controller and gRPC service wired from a config

use crate::bus::MetricBus;
use crate::config::ServerConfig;
use crate::controller::RunController;
use crate::grpc::{GrpcServerConfig, run_grpc_server};
use crate::trainer::Trainer;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A configured training server, ready to run
pub struct Server {
    config: ServerConfig,
    bus: Arc<MetricBus>,
    controller: Arc<RunController>,
    shutdown_token: CancellationToken,
}

impl Server {
    pub fn new(config: ServerConfig, trainer: Arc<dyn Trainer>) -> Self {
        let bus = Arc::new(MetricBus::new(config.bus_config()));
        let controller = Arc::new(RunController::new(
            trainer,
            Arc::clone(&bus),
            config.report_interval,
        ));
        Self {
            config,
            bus,
            controller,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the server
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Serve until the shutdown token is cancelled, then stop the active run
    /// and close the bus.
    pub async fn run(self) -> Result<()> {
        let served = run_grpc_server(GrpcServerConfig {
            addr: self.config.listen_addr,
            controller: Arc::clone(&self.controller),
            bus: Arc::clone(&self.bus),
            poll_timeout: self.config.poll_timeout(),
            stream_buffer: self.config.stream_buffer,
            shutdown_token: self.shutdown_token.clone(),
        })
        .await;

        // Subscriber loops have exited by now, so a trainer blocked on a full
        // queue is released and can observe cancellation.
        if !self.controller.shutdown(self.config.shutdown_grace()).await {
            warn!("Abandoning training run still active after grace period");
        }
        self.bus.close();
        info!("Training server stopped");

        served
    }
}
