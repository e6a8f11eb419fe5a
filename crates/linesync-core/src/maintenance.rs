//! Background maintenance.
//!
//! Change-tracking entries at or below a table's durable cursor have been
//! processed and are never read again, and cache entries past their TTL are
//! dead weight. [`Maintenance::run_once`] removes both; [`MaintenanceTask`]
//! runs it on an interval for the lifetime of the process.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::error::Result;
use crate::store::SledStore;

/// What one maintenance pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceResult {
    /// Tables whose change log shrank.
    pub tables_truncated: usize,
    /// Change-tracking entries removed across all tables.
    pub changes_removed: u64,
    /// Expired cache entries purged from the backend.
    pub cache_entries_purged: usize,
}

impl MaintenanceResult {
    /// Whether anything was removed.
    pub fn did_cleanup(&self) -> bool {
        self.changes_removed > 0 || self.cache_entries_purged > 0
    }

    fn record(&mut self, table: &str, removed: u64) {
        if removed > 0 {
            debug!(table, removed, "change log truncated");
            self.tables_truncated += 1;
            self.changes_removed += removed;
        }
    }
}

/// One maintenance pass over a store and, optionally, a cache.
pub struct Maintenance {
    store: Arc<SledStore>,
    cache: Option<SharedCache>,
    /// Tables whose changes nobody polls; truncated up to the log head.
    discarded: Vec<String>,
}

impl Maintenance {
    pub fn new(store: Arc<SledStore>) -> Self {
        Self {
            store,
            cache: None,
            discarded: Vec::new(),
        }
    }

    /// Also sweep expired entries of `cache`.
    pub fn with_cache(mut self, cache: SharedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Drop every change of `table` on each pass, cursor or not.
    pub fn discard_table(mut self, table: impl Into<String>) -> Self {
        self.discarded.push(table.into());
        self
    }

    /// Truncate processed changes and purge expired cache entries.
    ///
    /// Tables with a cursor lose the entries at or below it. Tables without
    /// a cursor keep their log so a first poller start still sees it, unless
    /// they were registered with [`discard_table`](Self::discard_table).
    pub async fn run_once(&self) -> Result<MaintenanceResult> {
        let mut result = MaintenanceResult::default();

        if let Some(cache) = &self.cache {
            result.cache_entries_purged = cache.purge_expired().await;
        }

        for cursor in self.store.cursors().all()? {
            if self.discarded.contains(&cursor.table) {
                continue;
            }
            let removed = self
                .store
                .truncate_changes_before(&cursor.table, cursor.last_version.saturating_add(1))?;
            result.record(&cursor.table, removed);
        }

        let head = self.store.changes().current_version();
        for table in &self.discarded {
            let removed = self
                .store
                .truncate_changes_before(table, head.saturating_add(1))?;
            result.record(table, removed);
        }

        Ok(result)
    }
}

/// Periodic [`Maintenance`] pass on a spawned task.
pub struct MaintenanceTask {
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceTask {
    /// Spawn the task. The first pass runs one `interval` after start.
    pub fn start(maintenance: Arc<Maintenance>, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "background maintenance task started");
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                match maintenance.run_once().await {
                    Ok(result) if result.did_cleanup() => info!(
                        tables = result.tables_truncated,
                        changes_removed = result.changes_removed,
                        cache_entries_purged = result.cache_entries_purged,
                        "background maintenance completed"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "background maintenance failed"),
                }
            }
            info!("background maintenance task stopping");
        });

        Self {
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the task to stop after any pass in flight.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Stop the task and wait for it to exit. Later calls return at once.
    pub async fn join(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "maintenance task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryBackend};
    use crate::store::CursorStore;
    use serde_json::json;

    fn store() -> Arc<SledStore> {
        Arc::new(SledStore::temporary().unwrap())
    }

    #[tokio::test]
    async fn test_truncates_up_to_cursor() {
        let store = store();
        for key in ["1", "2", "3"] {
            store.upsert("ORDERS", key, &json!({})).unwrap();
        }
        store.save("ORDERS", 2).await.unwrap();

        let result = Maintenance::new(store.clone()).run_once().await.unwrap();
        assert_eq!(result.tables_truncated, 1);
        assert_eq!(result.changes_removed, 2);

        let left = store.changes().changes_since("ORDERS", 0).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].version, 3);
    }

    #[tokio::test]
    async fn test_tables_without_cursor_are_kept() {
        let store = store();
        store.upsert("ORDERS", "1", &json!({})).unwrap();
        store.upsert("AUDIT", "1", &json!({})).unwrap();

        let result = Maintenance::new(store.clone()).run_once().await.unwrap();
        assert!(!result.did_cleanup());
        assert_eq!(store.changes().len(), 2);
    }

    #[tokio::test]
    async fn test_discarded_table_is_emptied() {
        let store = store();
        for key in ["1", "2"] {
            store.upsert("AUDIT", key, &json!({})).unwrap();
        }
        store.upsert("ORDERS", "1", &json!({})).unwrap();

        let maintenance = Maintenance::new(store.clone()).discard_table("AUDIT");
        let result = maintenance.run_once().await.unwrap();
        assert_eq!(result.changes_removed, 2);
        assert!(store.changes().changes_since("AUDIT", 0).unwrap().is_empty());
        assert_eq!(store.changes().changes_since("ORDERS", 0).unwrap().len(), 1);

        assert_eq!(maintenance.run_once().await.unwrap(), MaintenanceResult::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purges_expired_cache_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = Arc::new(Cache::new(backend.clone()));
        for page in 1..=50 {
            cache
                .set(&format!("print_history:page={}", page), &page, Duration::from_secs(1))
                .await;
        }

        time::advance(Duration::from_secs(10)).await;
        let result = Maintenance::new(store())
            .with_cache(cache.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(result.cache_entries_purged, 50);
        assert!(backend.is_empty());
        assert_eq!(cache.indexed_keys("print_history"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_on_interval_until_joined() {
        let store = store();
        store.upsert("ORDERS", "1", &json!({})).unwrap();
        store.save("ORDERS", 1).await.unwrap();

        let task = MaintenanceTask::start(
            Arc::new(Maintenance::new(store.clone())),
            Duration::from_secs(60),
        );

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.changes().len(), 1);

        time::sleep(Duration::from_secs(31)).await;
        assert!(store.changes().is_empty());

        task.join().await;
        task.join().await;

        store.upsert("ORDERS", "2", &json!({})).unwrap();
        store.save("ORDERS", 2).await.unwrap();
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.changes().len(), 1);
    }
}
