//! trainwatch-common - Shared types and utilities
//!
//! This crate provides the types used by both the training server and the
//! client, without pulling in the runtime pieces of either side.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`metric`]: The metric event value type reported during a run
//! - [`proto`]: Generated gRPC types and conversions to domain types
//! - [`status`]: Closed status enumerations carried as strings on the wire

pub mod defaults;
pub mod metric;
pub mod proto;
pub mod status;

// Re-export commonly used types
pub use metric::{MetricError, MetricEvent};
pub use status::{RunPhase, StartStatus};

/// Substitute the documented default for a non-positive epoch request.
///
/// A request for zero epochs is treated exactly like a request for
/// [`defaults::DEFAULT_EPOCHS`].
#[inline]
pub fn effective_epochs(requested: u32) -> u32 {
    if requested == 0 {
        defaults::DEFAULT_EPOCHS
    } else {
        requested
    }
}
