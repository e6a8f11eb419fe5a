//! Subscription manager.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use super::topic::{TopicEntry, TopicRegistry};
use crate::cdc::ChangePoller;
use crate::error::Result;
use crate::metrics::SharedMetrics;
use crate::transport::{ConnectionId, Transport};

/// Payload of the error event sent when an initial snapshot fails.
pub const INITIAL_SNAPSHOT_ERROR: &str = "Failed to fetch initial data";

/// What a subscribe call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Room size after joining.
    pub members: usize,
    /// Whether this call started the topic's poller.
    pub poller_started: bool,
    /// Whether the initial snapshot reached the connection.
    pub snapshot_delivered: bool,
}

/// Tracks topic membership and drives poller lifecycles from it.
///
/// The first member of a topic starts its poller, the last one leaving stops
/// it. A poller that stopped itself after repeated failures is restarted by
/// the next subscribe to its topic.
pub struct SubscriptionManager {
    registry: TopicRegistry,
    transport: Arc<dyn Transport>,
    metrics: SharedMetrics,
}

impl SubscriptionManager {
    pub fn new(registry: TopicRegistry) -> Self {
        Self {
            transport: registry.transport(),
            metrics: registry.metrics(),
            registry,
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn poller(&self, topic: &str) -> Option<Arc<ChangePoller>> {
        self.registry.poller(topic)
    }

    /// Registered topic names, sorted.
    pub fn topics(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Current member count of `topic`.
    pub fn members(&self, topic: &str) -> usize {
        self.transport.room_size(topic)
    }

    /// Join `connection` to `topic` and send it the current snapshot.
    ///
    /// Fails only for an unregistered topic. A poller start failure is
    /// logged and the connection still joins; a snapshot failure sends the
    /// topic's error event to this connection alone.
    pub async fn subscribe(&self, connection: &ConnectionId, topic: &str) -> Result<SubscribeOutcome> {
        let entry = self.registry.entry(topic)?;

        let (members, poller_started) = {
            let _membership = entry.membership.lock().await;
            let members = self.transport.join(connection, topic);
            self.metrics.record_subscribe();

            let mut poller_started = false;
            if members == 1 || !entry.poller.is_running() {
                match entry.poller.start().await {
                    Ok(started) => poller_started = started,
                    Err(e) => warn!(
                        %connection,
                        topic,
                        error = %e,
                        "subscribed without live updates, poller failed to start"
                    ),
                }
            }
            (members, poller_started)
        };

        info!(%connection, topic, members, "client subscribed");
        let snapshot_delivered = self.send_initial_snapshot(connection, &entry).await;

        Ok(SubscribeOutcome {
            members,
            poller_started,
            snapshot_delivered,
        })
    }

    async fn send_initial_snapshot(&self, connection: &ConnectionId, entry: &TopicEntry) -> bool {
        let topic = &entry.topic;
        match entry.poller.snapshot().await {
            Ok(data) => match self.transport.emit_to(connection, topic.event(), data) {
                Ok(()) => true,
                Err(e) => {
                    debug!(%connection, topic = topic.name(), error = %e, "initial snapshot not delivered");
                    false
                }
            },
            Err(e) => {
                self.metrics.record_snapshot_failure();
                warn!(%connection, topic = topic.name(), error = %e, "initial snapshot failed");
                let payload = json!({ "message": INITIAL_SNAPSHOT_ERROR });
                if let Err(e) = self.transport.emit_to(connection, &topic.error_event(), payload) {
                    debug!(%connection, topic = topic.name(), error = %e, "error event not delivered");
                }
                false
            }
        }
    }

    /// Remove `connection` from `topic`; stops the poller when the room empties.
    ///
    /// Returns the remaining member count.
    pub async fn unsubscribe(&self, connection: &ConnectionId, topic: &str) -> Result<usize> {
        let entry = self.registry.entry(topic)?;
        let _membership = entry.membership.lock().await;

        let remaining = self.transport.leave(connection, topic);
        self.metrics.record_unsubscribe();
        if remaining == 0 {
            entry.poller.stop().await;
        }

        info!(%connection, topic, remaining, "client unsubscribed");
        Ok(remaining)
    }

    /// Unsubscribe `connection` from every topic it belongs to.
    ///
    /// Returns the topics it left.
    pub async fn disconnect(&self, connection: &ConnectionId) -> Vec<String> {
        let mut left = Vec::new();
        for room in self.transport.rooms_of(connection) {
            if !self.registry.contains(&room) {
                self.transport.leave(connection, &room);
                continue;
            }
            match self.unsubscribe(connection, &room).await {
                Ok(_) => left.push(room),
                Err(e) => warn!(%connection, topic = %room, error = %e, "failed to leave topic"),
            }
        }

        self.metrics.record_disconnect();
        info!(%connection, topics = left.len(), "client disconnected");
        left
    }

    /// Stop every running poller and wait for their loops to exit.
    ///
    /// Returns how many were running.
    pub async fn shutdown(&self) -> usize {
        let mut stopped = 0;
        for entry in self.registry.entries() {
            let _membership = entry.membership.lock().await;
            if entry.poller.stop_and_wait().await {
                stopped += 1;
            }
        }
        info!(stopped, "all pollers stopped");
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::{PollerStatus, SnapshotQuery};
    use crate::config::EngineConfig;
    use crate::error::Error;
    use crate::metrics::SyncMetrics;
    use crate::pubsub::Topic;
    use crate::store::{CursorStore, SledStore};
    use crate::transport::LocalRooms;
    use async_trait::async_trait;
    use futures::future::join_all;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct CallsQuery {
        store: Arc<SledStore>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SnapshotQuery for CallsQuery {
        async fn snapshot(&self) -> Result<Value> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Query("timeout".into()));
            }
            let rows: Vec<Value> = self
                .store
                .scan("TB_R_ANDON_STATUS")?
                .into_iter()
                .map(|(_, row)| row)
                .collect();
            Ok(Value::Array(rows))
        }
    }

    /// Cursor store that cannot be read.
    struct BrokenCursors;

    #[async_trait]
    impl CursorStore for BrokenCursors {
        async fn load(&self, _table: &str) -> Result<Option<u64>> {
            Err(Error::Query("cursor table missing".into()))
        }

        async fn save(&self, _table: &str, _version: u64) -> Result<()> {
            Err(Error::Query("cursor table missing".into()))
        }
    }

    struct Fixture {
        rooms: Arc<LocalRooms>,
        query: Arc<CallsQuery>,
        metrics: SharedMetrics,
        manager: SubscriptionManager,
    }

    fn fixture_with(cursors: Option<Arc<dyn CursorStore>>) -> Fixture {
        let store = Arc::new(SledStore::temporary().unwrap());
        let rooms = Arc::new(LocalRooms::new());
        let metrics = Arc::new(SyncMetrics::new());
        let query = Arc::new(CallsQuery {
            store: store.clone(),
            failing: AtomicBool::new(false),
        });

        let cursors = cursors.unwrap_or_else(|| store.clone() as Arc<dyn CursorStore>);
        let mut registry = TopicRegistry::new(
            store,
            cursors,
            rooms.clone(),
            EngineConfig::new().with_poll_interval(Duration::from_secs(3600)),
        )
        .with_metrics(metrics.clone());
        registry
            .register(Topic::new("calls", "TB_R_ANDON_STATUS", "calls:update", query.clone()))
            .unwrap();

        Fixture {
            rooms,
            query,
            metrics,
            manager: SubscriptionManager::new(registry),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    #[tokio::test]
    async fn test_unknown_topic_rejected() {
        let fx = fixture();
        let conn = ConnectionId::from("a");
        let _rx = fx.rooms.register(conn.clone());

        let err = fx.manager.subscribe(&conn, "nope").await.unwrap_err();
        assert!(matches!(err, Error::UnknownTopic(_)));
        assert!(fx.rooms.rooms_of(&conn).is_empty());
        assert!(matches!(
            fx.manager.unsubscribe(&conn, "nope").await,
            Err(Error::UnknownTopic(_))
        ));
    }

    #[tokio::test]
    async fn test_first_subscriber_starts_poller_and_gets_snapshot() {
        let fx = fixture();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let mut rx_a = fx.rooms.register(a.clone());
        let mut rx_b = fx.rooms.register(b.clone());

        let first = fx.manager.subscribe(&a, "calls").await.unwrap();
        assert_eq!(
            first,
            SubscribeOutcome {
                members: 1,
                poller_started: true,
                snapshot_delivered: true
            }
        );
        assert_eq!(rx_a.recv().await.unwrap().event, "calls:update");
        assert!(rx_b.try_recv().is_err());

        let second = fx.manager.subscribe(&b, "calls").await.unwrap();
        assert_eq!(second.members, 2);
        assert!(!second.poller_started);
        assert_eq!(rx_b.recv().await.unwrap().event, "calls:update");
        assert!(rx_a.try_recv().is_err());

        assert_eq!(fx.metrics.poller_starts(), 1);
        fx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_last_unsubscribe_stops_poller() {
        let fx = fixture();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let _rx_a = fx.rooms.register(a.clone());
        let _rx_b = fx.rooms.register(b.clone());
        let poller = fx.manager.poller("calls").unwrap();

        fx.manager.subscribe(&a, "calls").await.unwrap();
        fx.manager.subscribe(&b, "calls").await.unwrap();

        assert_eq!(fx.manager.unsubscribe(&a, "calls").await.unwrap(), 1);
        assert!(poller.is_running());
        assert_eq!(fx.manager.unsubscribe(&b, "calls").await.unwrap(), 0);
        assert_eq!(poller.status(), PollerStatus::Stopped);
        assert_eq!(fx.metrics.active_pollers(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_start_one_poller() {
        let fx = fixture();
        let conns: Vec<ConnectionId> = (0..8).map(|i| ConnectionId::from(format!("c{}", i))).collect();
        let _rxs: Vec<_> = conns.iter().map(|c| fx.rooms.register(c.clone())).collect();

        let results = join_all(conns.iter().map(|c| fx.manager.subscribe(c, "calls"))).await;
        let started = results.iter().filter(|r| r.as_ref().unwrap().poller_started).count();

        assert_eq!(started, 1);
        assert_eq!(fx.metrics.poller_starts(), 1);
        assert_eq!(fx.manager.members("calls"), 8);
        fx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_topic() {
        let fx = fixture();
        let a = ConnectionId::from("a");
        let _rx = fx.rooms.register(a.clone());
        fx.manager.subscribe(&a, "calls").await.unwrap();
        fx.rooms.join(&a, "unmanaged");

        let left = fx.manager.disconnect(&a).await;
        assert_eq!(left, vec!["calls".to_string()]);
        assert!(fx.rooms.rooms_of(&a).is_empty());
        assert!(!fx.manager.poller("calls").unwrap().is_running());
        assert_eq!(fx.metrics.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_failure_reports_to_requester_only() {
        let fx = fixture();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let mut rx_a = fx.rooms.register(a.clone());
        let mut rx_b = fx.rooms.register(b.clone());

        fx.manager.subscribe(&a, "calls").await.unwrap();
        rx_a.recv().await.unwrap();

        fx.query.failing.store(true, Ordering::SeqCst);
        let outcome = fx.manager.subscribe(&b, "calls").await.unwrap();
        assert!(!outcome.snapshot_delivered);

        let event = rx_b.recv().await.unwrap();
        assert_eq!(event.event, "calls:update:error");
        assert_eq!(event.data, json!({"message": INITIAL_SNAPSHOT_ERROR}));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(fx.manager.members("calls"), 2);
        assert_eq!(fx.metrics.snapshot_failures(), 1);
        fx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_failure_still_subscribes() {
        let fx = fixture_with(Some(Arc::new(BrokenCursors)));
        let a = ConnectionId::from("a");
        let mut rx = fx.rooms.register(a.clone());

        let outcome = fx.manager.subscribe(&a, "calls").await.unwrap();
        assert_eq!(outcome.members, 1);
        assert!(!outcome.poller_started);
        assert!(outcome.snapshot_delivered);
        assert_eq!(rx.recv().await.unwrap().event, "calls:update");
        assert_eq!(fx.metrics.poller_start_failures(), 1);

        // A later subscribe retries the start.
        let b = ConnectionId::from("b");
        let _rx_b = fx.rooms.register(b.clone());
        fx.manager.subscribe(&b, "calls").await.unwrap();
        assert_eq!(fx.metrics.poller_start_failures(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_pollers() {
        let fx = fixture();
        let a = ConnectionId::from("a");
        let _rx = fx.rooms.register(a.clone());
        fx.manager.subscribe(&a, "calls").await.unwrap();

        assert_eq!(fx.manager.shutdown().await, 1);
        assert_eq!(fx.manager.shutdown().await, 0);
        assert_eq!(fx.manager.topics(), vec!["calls"]);
    }
}
