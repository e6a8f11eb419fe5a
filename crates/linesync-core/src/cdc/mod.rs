//! Change data capture: per-table pollers over change tracking.
//!
//! A [`ChangePoller`] watches one table. Each tick it asks its
//! [`ChangeSource`](crate::store::ChangeSource) for changes newer than its
//! cursor and, on a non-empty delta, persists the new cursor, runs the
//! topic's [`InvalidationHook`], computes the topic's [`SnapshotQuery`] and
//! broadcasts the snapshot to the topic's room.

mod poller;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use poller::ChangePoller;

/// Produces the full point-in-time payload of a topic.
#[async_trait]
pub trait SnapshotQuery: Send + Sync {
    async fn snapshot(&self) -> Result<Value>;
}

/// Runs before a snapshot is computed for a changed table.
///
/// Typically drops cache entries derived from the table so that a reader
/// racing the broadcast cannot repopulate the cache with pre-change data.
#[async_trait]
pub trait InvalidationHook: Send + Sync {
    async fn invalidate(&self, table: &str) -> Result<()>;
}

/// Lifecycle state of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerStatus {
    /// Never started.
    Idle,
    /// Timer armed; ticks are being scheduled.
    Running,
    /// Stopped explicitly or by the failure ceiling.
    Stopped,
}

impl fmt::Display for PollerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollerStatus::Idle => "idle",
            PollerStatus::Running => "running",
            PollerStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of one successful tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick was still in flight.
    Skipped,
    /// No change newer than the cursor.
    Idle,
    /// One snapshot was broadcast for a batch of changes.
    Broadcast {
        /// Number of changes in the batch.
        changes: usize,
        /// New cursor value.
        version: u64,
        /// Connections the snapshot was handed to.
        delivered: usize,
    },
}
