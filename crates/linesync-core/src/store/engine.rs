//! Embedded change-tracked table store.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sled::{Db, Tree};

use super::{ChangeOperation, ChangeRow, ChangeSource, ChangeTracking, CursorStore, SledCursorStore};
use crate::error::{Error, Result};

/// Table store with change tracking and cursor persistence in one sled database.
///
/// Rows are JSON documents keyed by a string primary key and kept in one tree
/// per table. Every mutation writes the row first and then records a change,
/// so a reader that observes the change also observes the row.
pub struct SledStore {
    db: Db,
    changes: ChangeTracking,
    cursors: SledCursorStore,
}

impl SledStore {
    /// Open a store at the given path, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a store that is deleted when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let changes = ChangeTracking::open(&db)?;
        let cursors = SledCursorStore::open(&db)?;
        Ok(Self {
            db,
            changes,
            cursors,
        })
    }

    fn table(&self, table: &str) -> Result<Tree> {
        Ok(self.db.open_tree(format!("rows:{}", table))?)
    }

    /// Insert or replace a row and return its change version.
    pub fn upsert(&self, table: &str, key: &str, row: &Value) -> Result<u64> {
        let bytes = serde_json::to_vec(row)?;
        let previous = self.table(table)?.insert(key.as_bytes(), bytes)?;

        let operation = if previous.is_some() {
            ChangeOperation::Update
        } else {
            ChangeOperation::Insert
        };
        self.changes.record(table, key, operation)
    }

    /// Delete a row, returning its change version if it existed.
    pub fn delete(&self, table: &str, key: &str) -> Result<Option<u64>> {
        match self.table(table)?.remove(key.as_bytes())? {
            Some(_) => Ok(Some(self.changes.record(table, key, ChangeOperation::Delete)?)),
            None => Ok(None),
        }
    }

    /// Get a row by key.
    pub fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        match self.table(table)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All rows of a table, ordered by key.
    pub fn scan(&self, table: &str) -> Result<Vec<(String, Value)>> {
        self.table(table)?
            .iter()
            .map(|result| {
                let (key, bytes) = result?;
                let key = String::from_utf8(key.to_vec())
                    .map_err(|e| Error::Deserialization(e.to_string()))?;
                Ok((key, decode_row(&bytes)?))
            })
            .collect()
    }

    /// Allocate a store-wide unique, increasing identifier.
    pub fn next_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    /// Drop change entries of `table` older than `before`; returns how many.
    pub fn truncate_changes_before(&self, table: &str, before: u64) -> Result<u64> {
        self.changes.truncate_before(table, before)
    }

    /// Change-tracking log.
    pub fn changes(&self) -> &ChangeTracking {
        &self.changes
    }

    /// Cursor rows.
    pub fn cursors(&self) -> &SledCursorStore {
        &self.cursors
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for SledStore {
    async fn changes_since(&self, table: &str, since: u64) -> Result<Vec<ChangeRow>> {
        self.changes.changes_since(table, since)
    }
}

#[async_trait]
impl CursorStore for SledStore {
    async fn load(&self, table: &str) -> Result<Option<u64>> {
        self.cursors.load(table).await
    }

    async fn save(&self, table: &str, version: u64) -> Result<()> {
        self.cursors.save(table, version).await
    }
}

fn decode_row(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}
