//! Test support: a trainer driven step by step from the test body
//!
//! [`scripted`] returns a [`ScriptedTrainer`] to hand to the controller and a
//! [`Script`] the test keeps. The trainer blocks on the script between steps,
//! so a test decides exactly when epochs begin, which metrics are published
//! and how the run ends.

use crate::trainer::{RunContext, RunSummary, TrainError, Trainer};
use anyhow::anyhow;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use trainwatch_common::MetricEvent;

const STEP_POLL_INTERVAL: Duration = Duration::from_millis(20);

enum Step {
    BeginEpoch(u32),
    Publish(MetricEvent),
    Finish(RunSummary),
    Fail(String),
    Panic(String),
}

/// Create a scripted trainer and the handle that drives it
pub fn scripted() -> (ScriptedTrainer, Script) {
    let (sender, receiver) = mpsc::channel();
    let runs = Arc::new(Mutex::new(Vec::new()));
    (
        ScriptedTrainer {
            steps: Mutex::new(receiver),
            runs: Arc::clone(&runs),
        },
        Script { sender, runs },
    )
}

/// Trainer that executes steps sent through its [`Script`].
///
/// If the script is dropped mid-run, the run completes with the requested
/// epoch count.
pub struct ScriptedTrainer {
    steps: Mutex<mpsc::Receiver<Step>>,
    runs: Arc<Mutex<Vec<u32>>>,
}

impl Trainer for ScriptedTrainer {
    fn run(&self, epochs: u32, ctx: &RunContext) -> Result<RunSummary, TrainError> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(epochs);

        let steps = self.steps.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match steps.recv_timeout(STEP_POLL_INTERVAL) {
                Ok(Step::BeginEpoch(epoch)) => ctx.begin_epoch(epoch),
                Ok(Step::Publish(event)) => ctx.report(event)?,
                Ok(Step::Finish(summary)) => return Ok(summary),
                Ok(Step::Fail(reason)) => return Err(anyhow!(reason).into()),
                Ok(Step::Panic(message)) => panic!("{message}"),
                Err(RecvTimeoutError::Timeout) => {
                    if ctx.is_cancelled() {
                        return Err(TrainError::Cancelled {
                            epochs_completed: ctx.current_epoch(),
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Ok(RunSummary {
                        epochs_completed: epochs,
                        converged: false,
                    });
                }
            }
        }
    }
}

/// Test-side handle of a [`ScriptedTrainer`]
pub struct Script {
    sender: mpsc::Sender<Step>,
    runs: Arc<Mutex<Vec<u32>>>,
}

impl Script {
    fn send(&self, step: Step) {
        // The trainer side lives as long as the controller; a closed channel
        // only happens after the test has torn it down.
        let _ = self.sender.send(step);
    }

    pub fn begin_epoch(&self, epoch: u32) {
        self.send(Step::BeginEpoch(epoch));
    }

    pub fn publish(&self, event: MetricEvent) {
        self.send(Step::Publish(event));
    }

    pub fn finish(&self, epochs_completed: u32, converged: bool) {
        self.send(Step::Finish(RunSummary {
            epochs_completed,
            converged,
        }));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.send(Step::Fail(reason.into()));
    }

    pub fn panic(&self, message: impl Into<String>) {
        self.send(Step::Panic(message.into()));
    }

    /// Epoch counts of every run the trainer was asked to do, in order
    pub fn runs(&self) -> Vec<u32> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
