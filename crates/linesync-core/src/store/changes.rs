//! Persistent change tracking backed by sled.
//!
//! Every mutation of a tracked table is assigned a store-wide version that
//! only grows, and is recorded under `table \0 version` (big-endian) so a
//! per-table range scan returns changes in version order.

use std::sync::atomic::{AtomicU64, Ordering};

use sled::{Db, Tree};

use super::{now_micros, read_u64, ArchivedChangeRow, ChangeOperation, ChangeRow};
use crate::error::{Error, Result};

const CURRENT_VERSION_KEY: &[u8] = b"current_version";

/// Change-tracking log for all tables of one store.
pub struct ChangeTracking {
    /// Change entries keyed by table and version.
    tree: Tree,
    /// Holds the highest version ever assigned.
    meta: Tree,
    /// Current (highest assigned) version.
    current_version: AtomicU64,
}

impl ChangeTracking {
    /// Open or create the change-tracking trees in the given sled database.
    pub fn open(db: &Db) -> Result<Self> {
        let tree = db.open_tree("change_tracking")?;
        let meta = db.open_tree("change_tracking_meta")?;
        let current_version = meta
            .get(CURRENT_VERSION_KEY)?
            .map(|v| read_u64(&v))
            .unwrap_or(0);

        Ok(Self {
            tree,
            meta,
            current_version: AtomicU64::new(current_version),
        })
    }

    /// Record a change to `table` and return its version.
    pub fn record(&self, table: &str, key: &str, operation: ChangeOperation) -> Result<u64> {
        let version = self.current_version.fetch_add(1, Ordering::SeqCst) + 1;

        let row = ChangeRow {
            version,
            table: table.to_string(),
            key: key.to_string(),
            operation,
            timestamp: now_micros(),
        };
        let value = rkyv::to_bytes::<rkyv::rancor::Error>(&row)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        // Version counter survives truncation of the entries themselves.
        self.meta.fetch_and_update(CURRENT_VERSION_KEY, |old| {
            let previous = old.map(read_u64).unwrap_or(0);
            Some(previous.max(version).to_be_bytes().to_vec())
        })?;
        self.tree.insert(entry_key(table, version), value.as_slice())?;

        Ok(version)
    }

    /// Get the current (highest assigned) version.
    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }

    /// All changes to `table` with a version strictly greater than `since`.
    pub fn changes_since(&self, table: &str, since: u64) -> Result<Vec<ChangeRow>> {
        if since == u64::MAX {
            return Ok(Vec::new());
        }

        let start = entry_key(table, since + 1);
        let end = table_upper_bound(table);

        self.tree
            .range(start..end)
            .map(|result| {
                let (_, value) = result?;
                decode_change(&value)
            })
            .collect()
    }

    /// Remove the entries of `table` older than `before` (exclusive).
    ///
    /// Returns the number of entries removed.
    pub fn truncate_before(&self, table: &str, before: u64) -> Result<u64> {
        let start = entry_key(table, 0);
        let end = entry_key(table, before);
        let mut removed = 0u64;

        for result in self.tree.range(start..end) {
            let (key, _) = result?;
            self.tree.remove(key)?;
            removed += 1;
        }

        Ok(removed)
    }

    /// Number of change entries across all tables.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check if no change has been recorded (or all were truncated).
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush the change-tracking trees to disk.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        self.meta.flush()?;
        Ok(())
    }
}

fn entry_key(table: &str, version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 9);
    key.extend_from_slice(table.as_bytes());
    key.push(0);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn table_upper_bound(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 1);
    key.extend_from_slice(table.as_bytes());
    key.push(1);
    key
}

fn decode_change(bytes: &[u8]) -> Result<ChangeRow> {
    // sled values carry no alignment guarantee.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::access::<ArchivedChangeRow, rkyv::rancor::Error>(aligned.as_slice())
        .map_err(|e| Error::Deserialization(e.to_string()))?;

    rkyv::deserialize::<ChangeRow, rkyv::rancor::Error>(archived)
        .map_err(|e| Error::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> ChangeTracking {
        let db = sled::Config::new().temporary(true).open().unwrap();
        ChangeTracking::open(&db).unwrap()
    }

    #[test]
    fn test_record_assigns_increasing_versions() {
        let changes = open_temp();
        assert_eq!(changes.current_version(), 0);

        let v1 = changes.record("ORDERS", "1", ChangeOperation::Insert).unwrap();
        let v2 = changes.record("PARTS", "9", ChangeOperation::Insert).unwrap();
        let v3 = changes.record("ORDERS", "1", ChangeOperation::Update).unwrap();

        assert_eq!((v1, v2, v3), (1, 2, 3));
        assert_eq!(changes.current_version(), 3);
    }

    #[test]
    fn test_changes_since_is_strict_and_per_table() {
        let changes = open_temp();
        changes.record("ORDERS", "1", ChangeOperation::Insert).unwrap();
        changes.record("PARTS", "1", ChangeOperation::Insert).unwrap();
        changes.record("ORDERS", "2", ChangeOperation::Insert).unwrap();
        changes.record("ORDERS", "1", ChangeOperation::Delete).unwrap();

        let all = changes.changes_since("ORDERS", 0).unwrap();
        assert_eq!(all.iter().map(|c| c.version).collect::<Vec<_>>(), vec![1, 3, 4]);
        assert!(all.iter().all(|c| c.table == "ORDERS"));

        let newer = changes.changes_since("ORDERS", 3).unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].version, 4);
        assert_eq!(newer[0].operation, ChangeOperation::Delete);

        assert!(changes.changes_since("ORDERS", 4).unwrap().is_empty());
        assert!(changes.changes_since("MISSING", 0).unwrap().is_empty());
    }

    #[test]
    fn test_table_prefix_does_not_leak() {
        let changes = open_temp();
        changes.record("ORDER", "1", ChangeOperation::Insert).unwrap();
        changes.record("ORDERS", "1", ChangeOperation::Insert).unwrap();

        let rows = changes.changes_since("ORDER", 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table, "ORDER");
    }

    #[test]
    fn test_truncate_before() {
        let changes = open_temp();
        for i in 0..5 {
            changes
                .record("ORDERS", &i.to_string(), ChangeOperation::Insert)
                .unwrap();
        }

        let removed = changes.truncate_before("ORDERS", 3).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(changes.len(), 3);

        let rows = changes.changes_since("ORDERS", 0).unwrap();
        assert_eq!(rows[0].version, 3);
    }

    #[test]
    fn test_version_continuity_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct");

        {
            let db = sled::open(&path).unwrap();
            let changes = ChangeTracking::open(&db).unwrap();
            changes.record("ORDERS", "1", ChangeOperation::Insert).unwrap();
            changes.record("ORDERS", "2", ChangeOperation::Insert).unwrap();
            changes.truncate_before("ORDERS", 3).unwrap();
            changes.flush().unwrap();
        }

        {
            let db = sled::open(&path).unwrap();
            let changes = ChangeTracking::open(&db).unwrap();
            assert_eq!(changes.current_version(), 2);
            let v = changes.record("ORDERS", "3", ChangeOperation::Insert).unwrap();
            assert_eq!(v, 3);
        }
    }
}
