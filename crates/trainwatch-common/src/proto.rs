//! Protocol buffer definitions for trainwatch.
//!
//! Contains the gRPC service definition and message types for communication
//! between the training server and its clients.

use crate::MetricEvent;

/// Generated protobuf types and gRPC service definitions.
pub mod trainwatch {
    tonic::include_proto!("trainwatch");
}

// Re-export commonly used types at module root for convenience

// gRPC server types (used by the server)
pub use trainwatch::training_server::{Training, TrainingServer};

// gRPC client types (used by the client)
pub use trainwatch::training_client::TrainingClient;

// Message types (used by both)
pub use trainwatch::{
    StartRequest, StartResponse, StatusRequest, StatusResponse, SubscribeRequest, TrainingMetric,
};

// --- Proto <-> Domain type conversions ---

impl From<&MetricEvent> for TrainingMetric {
    fn from(e: &MetricEvent) -> Self {
        TrainingMetric {
            epoch: e.epoch,
            batch: e.batch,
            batch_size: e.batch_size,
            batch_loss: e.batch_loss,
            predictions: e.predictions.clone(),
            truths: e.truths.clone(),
        }
    }
}

impl From<TrainingMetric> for MetricEvent {
    fn from(m: TrainingMetric) -> Self {
        MetricEvent {
            epoch: m.epoch,
            batch: m.batch,
            batch_size: m.batch_size,
            batch_loss: m.batch_loss,
            predictions: m.predictions,
            truths: m.truths,
        }
    }
}

/// Convert an empty string to None, keeping non-empty strings.
pub fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}
