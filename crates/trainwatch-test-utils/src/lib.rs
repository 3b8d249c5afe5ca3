//! Shared test utilities for trainwatch
//!
//! This crate provides common test helpers that can be used across
//! the server and client crates without circular dependencies.
//!
//! ## Modules
//!
//! - [`metrics`]: Canned metric events
//! - [`net`]: Free-port discovery and TCP readiness polling

pub mod metrics;
pub mod net;

// Re-export commonly used items
pub use metrics::sample_metric;
pub use net::{find_available_port, wait_for_tcp_ready};
