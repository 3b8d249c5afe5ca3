//! Metric event reported by the training collaborator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One reported progress sample of a run.
///
/// Created by the training collaborator at each reporting boundary and never
/// mutated afterwards; the server shares it between subscribers behind an
/// `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Zero-based epoch index
    pub epoch: u32,
    /// Zero-based batch index within the epoch
    pub batch: u32,
    /// Number of samples in the batch
    pub batch_size: u32,
    /// Loss of this batch
    pub batch_loss: f64,
    /// Predicted class per sample
    pub predictions: Vec<i32>,
    /// Ground-truth class per sample
    pub truths: Vec<i32>,
}

/// Reasons a metric event cannot be put on the wire
#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("predictions has {actual} entries, batch_size is {expected}")]
    PredictionCount { expected: u32, actual: usize },

    #[error("truths has {actual} entries, batch_size is {expected}")]
    TruthCount { expected: u32, actual: usize },
}

impl MetricEvent {
    /// Check that the per-sample vectors agree with `batch_size`.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.predictions.len() != self.batch_size as usize {
            return Err(MetricError::PredictionCount {
                expected: self.batch_size,
                actual: self.predictions.len(),
            });
        }
        if self.truths.len() != self.batch_size as usize {
            return Err(MetricError::TruthCount {
                expected: self.batch_size,
                actual: self.truths.len(),
            });
        }
        Ok(())
    }

    /// Fraction of samples whose prediction matches the truth.
    pub fn accuracy(&self) -> f64 {
        if self.truths.is_empty() {
            return 0.0;
        }
        let correct = self
            .predictions
            .iter()
            .zip(&self.truths)
            .filter(|(p, t)| p == t)
            .count();
        correct as f64 / self.truths.len() as f64
    }
}
