//! Watch flow: handshake, optional start, then follow the metric stream

use crate::client::RetryingClient;
use anyhow::{Context, Result, anyhow, bail};
use tokio::sync::mpsc;
use tonic::Streaming;
use tracing::{info, warn};
use trainwatch_common::proto::{StartResponse, TrainingMetric};
use trainwatch_common::{MetricEvent, StartStatus};

/// Where received metrics go
#[derive(Clone)]
pub enum MetricOutput {
    /// Print one line per event; JSON lines when `json` is set
    Stdout { json: bool },
    /// Forward events to a channel
    Channel(mpsc::Sender<MetricEvent>),
}

/// Options for [`watch`]
#[derive(Clone)]
pub struct WatchOptions {
    /// Request a run before following the stream
    pub start: bool,
    /// Epochs to request (0 selects the server default)
    pub epochs: i32,
    /// Confirmation flag sent with the start request
    pub confirmed: bool,
    /// Stop after this many events
    pub max_events: Option<u64>,
    /// Output destination
    pub output: MetricOutput,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            start: false,
            epochs: 0,
            confirmed: false,
            max_events: None,
            output: MetricOutput::Stdout { json: false },
        }
    }
}

impl WatchOptions {
    /// Set output to a channel
    pub fn with_channel(mut self, tx: mpsc::Sender<MetricEvent>) -> Self {
        self.output = MetricOutput::Channel(tx);
        self
    }
}

/// Why [`watch`] stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// The server ended the stream
    StreamEnded,
    /// `max_events` were received
    LimitReached,
    /// The output channel was dropped
    OutputClosed,
}

/// Result of a [`watch`] session
#[derive(Debug, Clone)]
pub struct WatchSummary {
    /// Events received
    pub events: u64,
    pub end: WatchEnd,
    /// Reply to the start request, if one was sent
    pub start: Option<StartResponse>,
}

/// Human-readable one-line rendering of an event
pub fn format_metric(event: &MetricEvent) -> String {
    format!(
        "epoch {} batch {:>5}  loss {:.4}  accuracy {:>5.1}%  ({} samples)",
        event.epoch,
        event.batch,
        event.batch_loss,
        event.accuracy() * 100.0,
        event.batch_size
    )
}

/// Run the watch flow against `client`
pub async fn watch(client: &RetryingClient, options: WatchOptions) -> Result<WatchSummary> {
    let status = client
        .status()
        .await
        .map_err(|e| anyhow!("{}", e.message()))
        .context("Handshake with training server failed")?;
    info!(
        state = %status.state,
        current_epoch = status.current_epoch,
        message = %status.message,
        "Connected to training server"
    );

    // Subscribe before starting so no event of the new run can be missed.
    let stream = client
        .subscribe()
        .await
        .map_err(|e| anyhow!("{} ({:?})", e.message(), e.code()))
        .context("Failed to subscribe to metrics")?;

    let start = if options.start {
        let reply = client
            .start(options.epochs, options.confirmed)
            .await
            .map_err(|e| anyhow!("{} ({:?})", e.message(), e.code()))
            .context("Start request failed")?;

        match StartStatus::parse(&reply.status) {
            Some(StartStatus::Started) => {
                info!(epochs = reply.epochs, "{}", reply.message)
            }
            Some(StartStatus::AlreadyRunning) => {
                warn!(epochs = reply.epochs, "{}", reply.message)
            }
            Some(StartStatus::NotConfirmed) => {
                bail!("Training not started: {}", reply.message)
            }
            None => bail!("Unexpected start status '{}'", reply.status),
        }
        Some(reply)
    } else {
        None
    };

    let (events, end) = follow(stream, &options).await?;
    info!(events, end = ?end, "Metric stream finished");

    Ok(WatchSummary { events, end, start })
}

async fn follow(
    mut stream: Streaming<TrainingMetric>,
    options: &WatchOptions,
) -> Result<(u64, WatchEnd)> {
    let mut events: u64 = 0;

    if options.max_events == Some(0) {
        return Ok((0, WatchEnd::LimitReached));
    }

    loop {
        let metric = match stream.message().await {
            Ok(Some(metric)) => metric,
            Ok(None) => return Ok((events, WatchEnd::StreamEnded)),
            Err(e) => {
                return Err(anyhow!("{} ({:?})", e.message(), e.code()))
                    .context(format!("Metric stream failed after {events} events"));
            }
        };
        let event = MetricEvent::from(metric);

        match &options.output {
            MetricOutput::Stdout { json: true } => {
                println!("{}", serde_json::to_string(&event)?);
            }
            MetricOutput::Stdout { json: false } => println!("{}", format_metric(&event)),
            MetricOutput::Channel(tx) => {
                if tx.send(event).await.is_err() {
                    return Ok((events, WatchEnd::OutputClosed));
                }
            }
        }

        events += 1;
        if options.max_events.is_some_and(|max| events >= max) {
            return Ok((events, WatchEnd::LimitReached));
        }
    }
}
