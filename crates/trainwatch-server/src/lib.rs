//! trainwatch-server - Training run controller and metric streaming server
//!
//! Accepts run control requests over gRPC, runs one training job at a time on
//! a blocking thread, and fans the job's metric events out to any number of
//! streaming subscribers.

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod grpc;
pub mod server;
pub mod stream;
pub mod synthetic;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trainer;

pub use bus::{BusConfig, BusError, MetricBus};
pub use config::ServerConfig;
pub use controller::{RunController, RunOutcome};
pub use server::Server;
pub use trainer::{RunContext, RunSummary, TrainError, Trainer};
