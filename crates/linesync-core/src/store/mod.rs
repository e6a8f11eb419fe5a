//! Relational store collaborator.
//!
//! The engine only needs two capabilities from the store: a change-tracking
//! query ("which rows of table T changed after version V") and durable
//! per-table cursor bookkeeping. Both are expressed as traits so a real
//! database driver can be plugged in; [`SledStore`] is the embedded
//! implementation used by the server and the tests.

mod changes;
mod cursor;
mod engine;

use async_trait::async_trait;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::error::Result;

pub use changes::ChangeTracking;
pub use cursor::SledCursorStore;
pub use engine::SledStore;

/// Kind of mutation recorded by change tracking.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum ChangeOperation {
    /// Row was created.
    Insert,
    /// Row was overwritten.
    Update,
    /// Row was removed.
    Delete,
}

/// One change-tracking row.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct ChangeRow {
    /// Change-tracking version, strictly increasing across the store.
    pub version: u64,
    /// Table the change belongs to.
    pub table: String,
    /// Primary key of the changed row.
    pub key: String,
    /// What happened to the row.
    pub operation: ChangeOperation,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Durable cursor row: the last version processed for one table.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Cursor {
    /// Watched table.
    pub table: String,
    /// Last change-tracking version fully processed.
    pub last_version: u64,
    /// Microseconds since the Unix epoch of the last write.
    pub updated_at: u64,
}

/// Change-tracking query capability.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Return every change to `table` with a version strictly greater than `since`.
    async fn changes_since(&self, table: &str, since: u64) -> Result<Vec<ChangeRow>>;
}

/// Durable per-table cursor persistence.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last recorded version for `table`, or `None` if never recorded.
    async fn load(&self, table: &str) -> Result<Option<u64>>;

    /// Upsert the version for `table`.
    ///
    /// Saving the same `(table, version)` twice is a no-op in effect, and a
    /// version below the stored one never overwrites it.
    async fn save(&self, table: &str, version: u64) -> Result<()>;
}

pub(crate) fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}
