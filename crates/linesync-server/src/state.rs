use std::sync::Arc;

use tracing::info;

use linesync_core::{
    Cache, LocalRooms, Maintenance, MaintenanceTask, MemoryBackend, SharedCache, SharedMetrics,
    SledStore, SubscriptionManager, SyncMetrics, TopicRegistry,
};

use crate::config::ServerConfig;
use crate::line::{LineStore, PRINT_LOG_TABLE};
use crate::topics::register_topics;

/// Application state shared across all routes and sockets
#[derive(Clone)]
pub struct AppState {
    pub line: LineStore,
    pub cache: SharedCache,
    pub manager: Arc<SubscriptionManager>,
    pub rooms: Arc<LocalRooms>,
    pub metrics: SharedMetrics,
    pub config: ServerConfig,
    maintenance: Arc<MaintenanceTask>,
}

impl AppState {
    /// Wire the engine over an already opened store.
    ///
    /// Spawns the maintenance task, so it must run inside a Tokio runtime.
    pub fn new(config: ServerConfig, store: SledStore) -> linesync_core::Result<Self> {
        let engine = config.engine_config();
        engine.validate()?;

        let store = Arc::new(store);
        let metrics: SharedMetrics = Arc::new(SyncMetrics::new());
        let rooms = Arc::new(LocalRooms::new());
        let cache: SharedCache = Arc::new(
            Cache::from_config(&engine, Arc::new(MemoryBackend::new()))
                .with_metrics(metrics.clone()),
        );
        let line = LineStore::new(store.clone());

        // No topic polls the print log; its changes only need to be dropped.
        let maintenance = MaintenanceTask::start(
            Arc::new(
                Maintenance::new(store.clone())
                    .with_cache(cache.clone())
                    .discard_table(PRINT_LOG_TABLE),
            ),
            engine.maintenance_interval,
        );

        let mut registry =
            TopicRegistry::new(store.clone(), store, rooms.clone(), engine.clone())
                .with_metrics(metrics.clone());
        if let Err(e) = register_topics(&mut registry, &line, cache.clone()) {
            maintenance.stop();
            return Err(e);
        }

        info!(
            topics = registry.len(),
            poll_interval_ms = engine.poll_interval.as_millis() as u64,
            cache_enabled = cache.is_enabled(),
            maintenance_interval_secs = engine.maintenance_interval.as_secs(),
            "sync engine ready"
        );

        Ok(Self {
            line,
            cache,
            manager: Arc::new(SubscriptionManager::new(registry)),
            rooms,
            metrics,
            config,
            maintenance: Arc::new(maintenance),
        })
    }

    /// Open the store at `config.data_path` and wire the engine over it.
    pub fn open(config: ServerConfig) -> linesync_core::Result<Self> {
        let store = SledStore::open(&config.data_path)?;
        Self::new(config, store)
    }

    /// Stop every poller and the maintenance task, then flush the store.
    pub async fn shutdown(&self) -> linesync_core::Result<()> {
        self.manager.shutdown().await;
        self.maintenance.join().await;
        self.line.store().flush()
    }
}
