//! Per-subscriber streaming loop
//!
//! A loop is `Attached` from the moment its `Subscribe` call is accepted
//! until it returns a [`LoopExit`], which is the `Detached` state. It waits
//! on the bus with a bounded timeout so that a client which went away is
//! noticed within one poll interval even while no training is happening.

use crate::bus::{Consumed, Subscription};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};
use trainwatch_common::proto::TrainingMetric;

/// Items sent to the tonic response stream
pub type StreamItem = Result<TrainingMetric, Status>;

/// Why a subscriber loop detached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The client closed the stream or the connection dropped
    ClientDisconnected,
    /// The bus was closed and fully drained
    BusClosed,
    /// The server is shutting down
    Shutdown,
    /// An internal error ended the stream; the client got `INTERNAL`
    Aborted(String),
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientDisconnected => f.write_str("client disconnected"),
            Self::BusClosed => f.write_str("metric bus closed"),
            Self::Shutdown => f.write_str("server shutdown"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Drains one subscription into one gRPC response stream
pub struct SubscriberLoop {
    subscription: Subscription,
    sender: mpsc::Sender<StreamItem>,
    poll_timeout: Duration,
    shutdown: CancellationToken,
}

impl SubscriberLoop {
    pub fn new(
        subscription: Subscription,
        sender: mpsc::Sender<StreamItem>,
        poll_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            subscription,
            sender,
            poll_timeout,
            shutdown,
        }
    }

    /// Run until the subscriber detaches. Dropping the subscription on return
    /// releases its queue on the bus.
    pub async fn run(mut self) -> LoopExit {
        let subscriber = self.subscription.id();
        let (exit, delivered) = self.drive().await;

        match &exit {
            LoopExit::Aborted(reason) => {
                warn!(subscriber, delivered, reason = %reason, "Metric stream aborted")
            }
            _ => info!(subscriber, delivered, reason = %exit, "Subscriber detached"),
        }
        exit
    }

    async fn drive(&mut self) -> (LoopExit, u64) {
        let mut delivered: u64 = 0;

        loop {
            let consumed = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return (LoopExit::Shutdown, delivered),
                consumed = self.subscription.try_consume(self.poll_timeout) => consumed,
            };

            match consumed {
                Consumed::Event(event) => {
                    if let Err(e) = event.validate() {
                        let reason = format!("Streaming error: {e}");
                        // Best effort; the client may already be gone.
                        let _ = self.sender.send(Err(Status::internal(reason.clone()))).await;
                        return (LoopExit::Aborted(reason), delivered);
                    }

                    let metric = TrainingMetric::from(&*event);
                    let sent = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return (LoopExit::Shutdown, delivered),
                        sent = self.sender.send(Ok(metric)) => sent,
                    };
                    if sent.is_err() {
                        return (LoopExit::ClientDisconnected, delivered);
                    }

                    delivered += 1;
                    debug!(
                        subscriber = self.subscription.id(),
                        epoch = event.epoch,
                        batch = event.batch,
                        "Metric sent"
                    );
                }
                Consumed::TimedOut => {
                    if self.sender.is_closed() {
                        return (LoopExit::ClientDisconnected, delivered);
                    }
                }
                Consumed::Closed => return (LoopExit::BusClosed, delivered),
            }
        }
    }
}
