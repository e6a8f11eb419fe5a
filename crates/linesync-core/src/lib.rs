//! LineSync core: a change-driven publish/subscribe synchronization engine.
//!
//! This crate provides:
//! - Change tracking and durable per-table cursors over an embedded sled store
//! - Interval-driven change pollers that broadcast fresh snapshots
//! - A topic registry and a subscription manager that start and stop
//!   pollers as subscribers come and go
//! - A cache-aside layer with TTLs and pattern or resource invalidation
//! - Background truncation of processed changes and expired cache entries
//! - Room-based transport plumbing and engine metrics

pub mod cache;
pub mod cdc;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod metrics;
pub mod pubsub;
pub mod store;
pub mod transport;

pub use cache::{Cache, CacheBackend, CacheInvalidation, CacheKey, MemoryBackend, SharedCache};
pub use cdc::{ChangePoller, InvalidationHook, PollerStatus, SnapshotQuery, TickOutcome};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use maintenance::{Maintenance, MaintenanceResult, MaintenanceTask};
pub use metrics::{new_shared_metrics, SharedMetrics, SyncMetrics};
pub use pubsub::{SubscribeOutcome, SubscriptionManager, Topic, TopicRegistry};
pub use store::{ChangeOperation, ChangeRow, ChangeSource, Cursor, CursorStore, SledStore};
pub use transport::{ConnectionId, LocalRooms, OutboundEvent, Transport};
