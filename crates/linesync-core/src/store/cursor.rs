//! Durable cursor bookkeeping.
//!
//! One row per watched table holding the last change-tracking version a
//! poller fully processed. Read once when a poller starts, written once per
//! non-empty tick.

use async_trait::async_trait;
use sled::{Db, Tree};
use tracing::debug;

use super::{now_micros, ArchivedCursor, Cursor, CursorStore};
use crate::error::{Error, Result};

/// sled-backed [`CursorStore`].
pub struct SledCursorStore {
    tree: Tree,
}

impl SledCursorStore {
    /// Open or create the cursor tree in the given sled database.
    pub fn open(db: &Db) -> Result<Self> {
        let tree = db.open_tree("cdc_cursor")?;
        Ok(Self { tree })
    }

    /// Full cursor row for `table`, if one was ever saved.
    pub fn get(&self, table: &str) -> Result<Option<Cursor>> {
        match self.tree.get(table.as_bytes())? {
            Some(value) => Ok(Some(decode_cursor(&value)?)),
            None => Ok(None),
        }
    }

    /// Upsert the cursor for `table`, never moving it backwards.
    ///
    /// Returns `true` if the stored row changed.
    pub fn put(&self, table: &str, version: u64) -> Result<bool> {
        if let Some(existing) = self.get(table)? {
            if existing.last_version >= version {
                debug!(
                    table,
                    stored = existing.last_version,
                    version,
                    "cursor already at or beyond version"
                );
                return Ok(false);
            }
        }

        let cursor = Cursor {
            table: table.to_string(),
            last_version: version,
            updated_at: now_micros(),
        };
        let value = rkyv::to_bytes::<rkyv::rancor::Error>(&cursor)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.tree.insert(table.as_bytes(), value.as_slice())?;

        Ok(true)
    }

    /// Every stored cursor, ordered by table name.
    pub fn all(&self) -> Result<Vec<Cursor>> {
        self.tree
            .iter()
            .map(|result| {
                let (_, value) = result?;
                decode_cursor(&value)
            })
            .collect()
    }

    /// Flush the cursor tree to disk.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for SledCursorStore {
    async fn load(&self, table: &str) -> Result<Option<u64>> {
        Ok(self.get(table)?.map(|c| c.last_version))
    }

    async fn save(&self, table: &str, version: u64) -> Result<()> {
        self.put(table, version)?;
        Ok(())
    }
}

fn decode_cursor(bytes: &[u8]) -> Result<Cursor> {
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::access::<ArchivedCursor, rkyv::rancor::Error>(aligned.as_slice())
        .map_err(|e| Error::Deserialization(e.to_string()))?;

    rkyv::deserialize::<Cursor, rkyv::rancor::Error>(archived)
        .map_err(|e| Error::Deserialization(e.to_string()))
}
