//! Concurrent fan-out relay for cross-site replication.
//!
//! Writes committed to a partitioned dataset are forwarded, in per-partition
//! order, to a remote site by a fixed-size group of parallel worker dispatchers
//! sharing one logical, partition-sharded event queue. This crate implements the
//! fan-out and lifecycle coordination layer: partition routing, the start-up
//! barrier, coordinated stop with bounded parallelism, and broadcast
//! pause/resume. The remote transmission engine is abstracted behind the
//! [`dispatcher::Dispatcher`] trait.

pub mod concurrency;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod group;
mod macros;
pub mod queue;
pub mod routing;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
