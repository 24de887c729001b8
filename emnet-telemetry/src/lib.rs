//! # emnet Telemetry
//!
//! Crate for log output and metric export. The stack itself only emits
//! `tracing` events and keeps plain counters; this crate decides where both
//! end up.

pub mod logging;
pub mod metrics;

pub use logging::StackLogger;
pub use metrics::MetricsRecorder;
