//! Concurrency utilities for coordinating the fan-out relay.
//!
//! The relay runs one long-lived task per worker dispatcher, and the coordinator
//! steers all of them through well-defined channels instead of shared flags:
//!
//! - the [`shutdown`] module implements per-worker shutdown signaling, so one
//!   worker's stop never depends on another's;
//! - the [`pause`] module implements the broadcast pause/resume channel that every
//!   worker subscribes to.
//!
//! Both are thin wrappers around tokio watch channels. Worker run-state itself
//! lives with the worker handle, guarded by the handle's own lock and notified
//! through the handle's own [`tokio::sync::Notify`].

pub mod pause;
pub mod shutdown;
