//! Worker implementations for the fan-out relay.

pub mod coordinator;
pub mod dispatch;
