//! Topic definitions and the registry binding each topic to its poller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cdc::{ChangePoller, InvalidationHook, SnapshotQuery};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metrics::{SharedMetrics, SyncMetrics};
use crate::store::{ChangeSource, CursorStore};
use crate::transport::Transport;

/// A named feed: one watched table, one event name, one snapshot query.
///
/// The topic name doubles as the transport room its subscribers join.
#[derive(Clone)]
pub struct Topic {
    name: String,
    table: String,
    event: String,
    query: Arc<dyn SnapshotQuery>,
    hook: Option<Arc<dyn InvalidationHook>>,
    interval: Option<Duration>,
}

impl Topic {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        event: impl Into<String>,
        query: Arc<dyn SnapshotQuery>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            event: event.into(),
            query,
            hook: None,
            interval: None,
        }
    }

    /// Run `hook` after the cursor is saved and before the snapshot.
    pub fn with_hook(mut self, hook: Arc<dyn InvalidationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Poll at `interval` instead of the engine default.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Event sent to a single subscriber whose initial snapshot failed.
    pub fn error_event(&self) -> String {
        format!("{}:error", self.event)
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("event", &self.event)
            .field("hook", &self.hook.is_some())
            .field("interval", &self.interval)
            .finish()
    }
}

/// A registered topic and the poller bound to it.
pub(crate) struct TopicEntry {
    pub(crate) topic: Topic,
    pub(crate) poller: Arc<ChangePoller>,
    /// Serializes membership changes with the poller start/stop they trigger.
    pub(crate) membership: tokio::sync::Mutex<()>,
}

/// Registry of topics, populated at startup.
///
/// Each registered topic gets exactly one [`ChangePoller`], built from the
/// shared store, transport and engine configuration.
pub struct TopicRegistry {
    source: Arc<dyn ChangeSource>,
    cursors: Arc<dyn CursorStore>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    metrics: SharedMetrics,
    entries: HashMap<String, Arc<TopicEntry>>,
}

impl TopicRegistry {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        cursors: Arc<dyn CursorStore>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            cursors,
            transport,
            config,
            metrics: Arc::new(SyncMetrics::new()),
            entries: HashMap::new(),
        }
    }

    /// Share a metrics registry with every poller registered afterwards.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Register a topic and build its poller.
    pub fn register(&mut self, topic: Topic) -> Result<()> {
        if self.entries.contains_key(topic.name()) {
            return Err(Error::DuplicateTopic(topic.name().to_string()));
        }

        let mut poller = ChangePoller::new(
            topic.table.clone(),
            self.source.clone(),
            self.cursors.clone(),
            topic.query.clone(),
            self.transport.clone(),
        )
        .with_room(topic.name.clone())
        .with_event(topic.event.clone())
        .with_interval(topic.interval.unwrap_or(self.config.poll_interval))
        .with_max_failures(self.config.max_consecutive_failures)
        .with_metrics(self.metrics.clone());
        if let Some(hook) = &topic.hook {
            poller = poller.with_hook(hook.clone());
        }

        debug!(topic = %topic.name, table = %topic.table, event = %topic.event, "topic registered");
        self.entries.insert(
            topic.name.clone(),
            Arc::new(TopicEntry {
                topic,
                poller: Arc::new(poller),
                membership: tokio::sync::Mutex::new(()),
            }),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Topic> {
        self.entries.get(name).map(|entry| &entry.topic)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn poller(&self, name: &str) -> Option<Arc<ChangePoller>> {
        self.entries.get(name).map(|entry| entry.poller.clone())
    }

    /// Registered topic names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry(&self, name: &str) -> Result<Arc<TopicEntry>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTopic(name.to_string()))
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Arc<TopicEntry>> {
        self.entries.values()
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub(crate) fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }
}
