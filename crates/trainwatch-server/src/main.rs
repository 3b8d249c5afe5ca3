//! trainwatch-server: gRPC training control and metrics streaming server

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use trainwatch_server::synthetic::SyntheticTrainer;
use trainwatch_server::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "trainwatch-server")]
#[command(about = "Training control and metrics streaming server")]
#[command(version)]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(long, env = "TRAINWATCH_LISTEN")]
    listen: Option<SocketAddr>,

    /// Report every Nth batch (overrides the config file)
    #[arg(long, env = "TRAINWATCH_REPORT_INTERVAL")]
    report_interval: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(interval) = args.report_interval {
        anyhow::ensure!(interval >= 1, "--report-interval must be at least 1");
        config.report_interval = interval;
    }

    info!(
        listen = %config.listen_addr,
        report_interval = config.report_interval,
        batches_per_epoch = config.trainer.batches_per_epoch,
        batch_size = config.trainer.batch_size,
        max_subscribers = config.max_subscribers,
        "Starting trainwatch-server"
    );

    let trainer = Arc::new(SyntheticTrainer::new(config.trainer.clone()));
    let server = Server::new(config, trainer);
    let shutdown_token = server.shutdown_token();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Received Ctrl-C, shutting down");
        shutdown_token.cancel();
    });

    server.run().await
}
