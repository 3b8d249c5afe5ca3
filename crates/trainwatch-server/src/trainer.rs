//! Training collaborator seam
//!
//! The controller never runs model code itself. It hands a [`Trainer`] the
//! requested epoch count and a [`RunContext`], on a blocking thread, and
//! learns how the run ended from the returned result.

use crate::bus::{BusError, MetricBus};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use trainwatch_common::MetricEvent;

/// How a run that returned normally ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Epochs fully trained
    pub epochs_completed: u32,
    /// Whether training stopped early because the loss converged
    pub converged: bool,
}

/// Errors a training collaborator can end a run with
#[derive(Debug, Error)]
pub enum TrainError {
    /// The server asked the run to stop
    #[error("run cancelled after {epochs_completed} epochs")]
    Cancelled { epochs_completed: u32 },

    /// A metric could not be handed to the bus
    #[error("failed to publish metric: {0}")]
    Publish(#[from] BusError),

    /// Anything else that went wrong inside the collaborator
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A long-running training job.
///
/// `run` is called on a blocking thread and may take as long as it needs.
/// It must report metrics through [`RunContext::report`] and should check
/// [`RunContext::is_cancelled`] between batches.
pub trait Trainer: Send + Sync + 'static {
    fn run(&self, epochs: u32, ctx: &RunContext) -> Result<RunSummary, TrainError>;
}

/// Progress of the active run, readable without the controller lock
#[derive(Debug, Default)]
pub struct RunProgress {
    current_epoch: AtomicU32,
}

impl RunProgress {
    /// Zero-based index of the epoch being trained
    pub fn current_epoch(&self) -> u32 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    fn set_epoch(&self, epoch: u32) {
        self.current_epoch.store(epoch, Ordering::Relaxed);
    }
}

/// Everything a trainer needs to report on its run
pub struct RunContext {
    run_id: u64,
    bus: Arc<MetricBus>,
    progress: Arc<RunProgress>,
    report_interval: u32,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        run_id: u64,
        bus: Arc<MetricBus>,
        progress: Arc<RunProgress>,
        report_interval: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            bus,
            progress,
            report_interval: report_interval.max(1),
            cancel,
        }
    }

    /// Sequence number of this run within the server process
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Record that training moved on to `epoch`
    pub fn begin_epoch(&self, epoch: u32) {
        self.progress.set_epoch(epoch);
    }

    /// Epoch most recently passed to [`RunContext::begin_epoch`]
    pub fn current_epoch(&self) -> u32 {
        self.progress.current_epoch()
    }

    /// Whether `batch` (zero-based, out of `num_batches`) is a reporting
    /// boundary: every Nth batch, and always the last one of the epoch.
    pub fn should_report(&self, batch: u32, num_batches: u32) -> bool {
        batch % self.report_interval == 0 || batch + 1 == num_batches
    }

    /// Publish a metric event. Blocks while a subscriber is backed up.
    pub fn report(&self, event: MetricEvent) -> Result<(), TrainError> {
        self.bus.publish(event)?;
        Ok(())
    }

    /// Whether the server asked the run to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
