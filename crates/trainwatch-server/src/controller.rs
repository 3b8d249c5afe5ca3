//! Run controller: the `Idle -> Running -> Idle` state machine
//!
//! All transitions happen under the controller's lock. The lock is held for
//! the check-and-transition only; the run itself executes on a blocking
//! thread owned by a supervisor task, which reports the result back and
//! returns the controller to `Idle`.

use crate::bus::MetricBus;
use crate::trainer::{RunContext, RunProgress, RunSummary, TrainError, Trainer};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use trainwatch_common::{RunPhase, StartStatus, effective_epochs};

/// Controller errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Shutdown has begun; no new runs are accepted
    #[error("server is shutting down")]
    ShuttingDown,
}

/// How the previous run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { epochs_completed: u32, converged: bool },
    Failed { reason: String },
    Cancelled { epochs_completed: u32 },
}

impl RunOutcome {
    fn from_join(result: Result<Result<RunSummary, TrainError>, JoinError>) -> Self {
        match result {
            Ok(Ok(summary)) => Self::Completed {
                epochs_completed: summary.epochs_completed,
                converged: summary.converged,
            },
            Ok(Err(TrainError::Cancelled { epochs_completed })) => {
                Self::Cancelled { epochs_completed }
            }
            Ok(Err(e)) => Self::Failed {
                reason: e.to_string(),
            },
            Err(e) if e.is_panic() => Self::Failed {
                reason: format!("trainer panicked: {}", panic_message(e.into_panic())),
            },
            Err(_) => Self::Failed {
                reason: "run task was cancelled".to_string(),
            },
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed {
                epochs_completed,
                converged: true,
            } => write!(f, "converged after {epochs_completed} epochs"),
            Self::Completed {
                epochs_completed, ..
            } => write!(f, "completed {epochs_completed} epochs"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Cancelled { epochs_completed } => {
                write!(f, "cancelled after {epochs_completed} epochs")
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Controller state. At most one run is `Running`.
#[derive(Debug, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running {
        run_id: u64,
        epochs: u32,
        progress: Arc<RunProgress>,
    },
}

#[derive(Debug, Default)]
struct ControllerState {
    run: RunState,
    last_outcome: Option<RunOutcome>,
    last_epochs: u32,
    next_run_id: u64,
}

/// Snapshot returned by [`RunController::status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub message: String,
    pub current_epoch: u32,
    /// Epochs of the active run, or of the last run once idle
    pub epochs_requested: u32,
    pub last_outcome: Option<RunOutcome>,
}

/// Reply to [`RunController::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub status: StartStatus,
    pub message: String,
    /// Epochs of the run that is (or would be) active
    pub epochs: u32,
}

/// Owns the run state and launches the training collaborator
pub struct RunController {
    state: Arc<RwLock<ControllerState>>,
    trainer: Arc<dyn Trainer>,
    bus: Arc<MetricBus>,
    report_interval: u32,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl RunController {
    pub fn new(trainer: Arc<dyn Trainer>, bus: Arc<MetricBus>, report_interval: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(ControllerState::default())),
            trainer,
            bus,
            report_interval,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Current state. Never blocks on the run itself.
    pub async fn status(&self) -> RunStatus {
        let state = self.state.read().await;
        match &state.run {
            RunState::Running {
                epochs, progress, ..
            } => RunStatus {
                phase: RunPhase::Training,
                message: "Training in progress".to_string(),
                current_epoch: progress.current_epoch(),
                epochs_requested: *epochs,
                last_outcome: state.last_outcome.clone(),
            },
            RunState::Idle => {
                let message = match &state.last_outcome {
                    Some(outcome) => {
                        format!("Server ready to start training (last run {outcome})")
                    }
                    None => "Server ready to start training".to_string(),
                };
                RunStatus {
                    phase: RunPhase::Ready,
                    message,
                    current_epoch: 0,
                    epochs_requested: state.last_epochs,
                    last_outcome: state.last_outcome.clone(),
                }
            }
        }
    }

    /// Start a run of `epochs_requested` epochs (0 selects the default).
    ///
    /// An active run makes this a no-op reported as `already_running`; a
    /// missing confirmation is reported as `not_confirmed`.
    pub async fn start(
        &self,
        epochs_requested: u32,
        confirmed: bool,
    ) -> Result<StartOutcome, ControllerError> {
        let epochs = effective_epochs(epochs_requested);
        let mut state = self.state.write().await;

        if let RunState::Running { epochs, .. } = &state.run {
            return Ok(StartOutcome {
                status: StartStatus::AlreadyRunning,
                message: "Training already in progress".to_string(),
                epochs: *epochs,
            });
        }

        if !confirmed {
            return Ok(StartOutcome {
                status: StartStatus::NotConfirmed,
                message: "Set confirmed=true to start training".to_string(),
                epochs,
            });
        }

        if self.cancel.is_cancelled() {
            return Err(ControllerError::ShuttingDown);
        }

        let run_id = state.next_run_id;
        state.next_run_id += 1;
        let progress = Arc::new(RunProgress::default());
        state.run = RunState::Running {
            run_id,
            epochs,
            progress: Arc::clone(&progress),
        };
        state.last_epochs = epochs;
        self.bus.begin_run();

        let ctx = RunContext::new(
            run_id,
            Arc::clone(&self.bus),
            progress,
            self.report_interval,
            self.cancel.child_token(),
        );
        self.launch(run_id, epochs, ctx);

        info!(run_id, epochs, "Training run started");
        Ok(StartOutcome {
            status: StartStatus::Started,
            message: format!("Training started for {epochs} epochs"),
            epochs,
        })
    }

    fn launch(&self, run_id: u64, epochs: u32, ctx: RunContext) {
        let trainer = Arc::clone(&self.trainer);
        let state = Arc::clone(&self.state);
        let bus = Arc::clone(&self.bus);

        self.tasks.spawn(async move {
            let started = Instant::now();
            let result = tokio::task::spawn_blocking(move || trainer.run(epochs, &ctx)).await;
            let outcome = RunOutcome::from_join(result);
            let elapsed_secs = started.elapsed().as_secs_f64();

            match &outcome {
                RunOutcome::Completed { .. } => {
                    info!(run_id, elapsed_secs, outcome = %outcome, "Training run finished")
                }
                RunOutcome::Cancelled { .. } => {
                    warn!(run_id, elapsed_secs, outcome = %outcome, "Training run cancelled")
                }
                RunOutcome::Failed { reason } => {
                    error!(run_id, elapsed_secs, reason = %reason, "Training run failed")
                }
            }

            let mut state = state.write().await;
            if matches!(state.run, RunState::Running { run_id: active, .. } if active == run_id) {
                bus.end_run();
                state.run = RunState::Idle;
                state.last_outcome = Some(outcome);
            }
        });
    }

    /// Whether a run is active
    pub async fn is_running(&self) -> bool {
        matches!(self.state.read().await.run, RunState::Running { .. })
    }

    /// Cancel the active run and wait up to `grace` for it to wind down.
    ///
    /// Returns `true` if every supervised task finished in time. New starts
    /// are refused from here on.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tasks.close();
        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs_f64(),
                    "Training run did not stop within the shutdown grace period"
                );
                false
            }
        }
    }
}
