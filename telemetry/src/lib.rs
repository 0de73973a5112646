//! Telemetry initialization shared by relay binaries and tests.

pub mod tracing;
