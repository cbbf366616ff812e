//! # Observability
//!
//! Prometheus metrics and log setup.
//!
//! - `metrics`: Prometheus metrics collection
//! - `logging`: `tracing` subscriber configuration

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use metrics::*;
