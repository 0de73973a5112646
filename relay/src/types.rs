//! Core data types shared across the fan-out relay.

use std::fmt;

use bytes::Bytes;

/// Unique identifier for a dispatcher group.
///
/// A group id determines isolation between groups, in terms of logging and
/// diagnostics. It carries no routing meaning.
pub type GroupId = u64;

/// Index of a worker dispatcher inside a group, in `0..worker_count`.
pub type WorkerIndex = usize;

/// Identifier of the source data partition an event belongs to.
///
/// The key is stable for the lifetime of the event and is never reassigned. It is
/// the sole input to worker assignment: all events carrying the same key are
/// delivered by the same worker, which is what preserves per-partition ordering
/// under parallel dispatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(pub u64);

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A committed change captured from the local dataset, ready for forwarding to the
/// remote site.
///
/// The payload is opaque to the relay; serialization and wire formatting are the
/// dispatcher's concern. An event whose partition could not be resolved at capture
/// time carries [`None`] and is rejected by routing instead of being mis-routed.
#[derive(Debug, Clone)]
pub struct ReplicationEvent {
    /// Source partition of the event, if resolved.
    pub partition: Option<PartitionKey>,
    /// Opaque event payload.
    pub payload: Bytes,
}

impl ReplicationEvent {
    /// Creates an event bound to a resolved partition.
    pub fn new(partition: PartitionKey, payload: impl Into<Bytes>) -> Self {
        Self {
            partition: Some(partition),
            payload: payload.into(),
        }
    }

    /// Creates an event whose partition is not resolved.
    ///
    /// Such events are rejected at enqueue time with a routing error.
    pub fn unresolved(payload: impl Into<Bytes>) -> Self {
        Self {
            partition: None,
            payload: payload.into(),
        }
    }
}
