//! Read-through cache layer.
//!
//! [`Cache`] wraps a [`CacheBackend`] with JSON serialization, TTLs, a
//! per-resource key index and the cache-aside primitive
//! [`Cache::get_or_compute`]. A missing, disabled or failing backend never
//! surfaces an error: reads become misses and writes become no-ops, so
//! correctness only depends on the canonical store.
//!
//! Keys are namespaced by resource, and for parameterised reads by the full
//! parameter tuple (see [`CacheKey`]). The resource is the part of the key
//! before the first `:` and is what [`Cache::invalidate_resource`] uses.
//! Index entries carry the key's expiry so keys the backend already dropped
//! do not pile up; [`Cache::purge_expired`] sweeps both.

mod backend;
mod pattern;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cdc::InvalidationHook;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::metrics::{SharedMetrics, SyncMetrics};

pub use backend::{CacheBackend, MemoryBackend};
pub use pattern::glob_match;

/// Namespaced cache key: `resource:name=value:name=value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    params: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: Vec::new(),
        }
    }

    /// Append one parameter; order is significant.
    pub fn param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Pattern matching every key of this key's resource.
    pub fn resource_pattern(&self) -> String {
        format!("{}:*", self.resource)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;
        for (name, value) in &self.params {
            write!(f, ":{}={}", name, value)?;
        }
        Ok(())
    }
}

fn resource_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| now >= at)
}

/// Cache-aside service over an optional backing store.
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
    default_ttl: Duration,
    /// Keys written by this process and their expiry, grouped by resource.
    index: DashMap<String, HashMap<String, Option<Instant>>>,
    metrics: SharedMetrics,
}

impl Cache {
    /// Cache over the given backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_backend(Some(backend))
    }

    /// Cache that always misses.
    pub fn disabled() -> Self {
        Self::with_backend(None)
    }

    /// Cache honouring `cache_enabled` and `default_cache_ttl` from the config.
    pub fn from_config(config: &EngineConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let cache = if config.cache_enabled {
            Self::new(backend)
        } else {
            Self::disabled()
        };
        cache.with_default_ttl(config.default_cache_ttl)
    }

    fn with_backend(backend: Option<Arc<dyn CacheBackend>>) -> Self {
        Self {
            backend,
            default_ttl: Duration::from_secs(crate::config::DEFAULT_CACHE_TTL_SECS),
            index: DashMap::new(),
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether a backing store is configured.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get and deserialize a value; any failure is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;

        let raw = match backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.metrics.record_cache_miss();
                return None;
            }
            Err(e) => {
                warn!(error = %e, key, "cache get failed");
                self.metrics.record_cache_degraded();
                self.metrics.record_cache_miss();
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "cache hit");
                self.metrics.record_cache_hit();
                Some(value)
            }
            Err(e) => {
                warn!(error = %e, key, "cached value could not be decoded, treating as miss");
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    /// Serialize and store a value. Returns `false` if nothing was stored.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, key, "cache value could not be encoded");
                return false;
            }
        };

        match backend.set(key, raw, Some(ttl)).await {
            Ok(()) => {
                let now = Instant::now();
                let mut indexed = self.index.entry(resource_of(key).to_string()).or_default();
                indexed.retain(|_, expires_at| !is_expired(*expires_at, now));
                indexed.insert(key.to_string(), now.checked_add(ttl));
                drop(indexed);
                self.metrics.record_cache_set();
                debug!(key, ttl_secs = ttl.as_secs(), "cache set");
                true
            }
            Err(e) => {
                warn!(error = %e, key, "cache set failed");
                self.metrics.record_cache_degraded();
                false
            }
        }
    }

    /// Delete one key. Returns `true` if it existed.
    pub async fn delete(&self, key: &str) -> bool {
        self.delete_keys(vec![key.to_string()]).await > 0
    }

    /// Delete every key matching a glob pattern; returns how many were removed.
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        let keys = match backend.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, pattern, "cache key scan failed");
                self.metrics.record_cache_degraded();
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }

        let removed = self.delete_keys(keys).await;
        debug!(pattern, removed, "cache delete by pattern");
        removed
    }

    /// Delete every key this process stored under `resource`, without a key scan.
    pub async fn invalidate_resource(&self, resource: &str) -> usize {
        let keys: Vec<String> = match self.index.remove(resource) {
            Some((_, keys)) => keys.into_keys().collect(),
            None => return 0,
        };

        let removed = self.delete_keys(keys).await;
        debug!(resource, removed, "cache resource invalidated");
        removed
    }

    async fn delete_keys(&self, keys: Vec<String>) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        for key in &keys {
            let resource = resource_of(key);
            if let Some(mut indexed) = self.index.get_mut(resource) {
                indexed.remove(key);
            }
            self.index.remove_if(resource, |_, indexed| indexed.is_empty());
        }

        match backend.delete(&keys).await {
            Ok(removed) => {
                self.metrics.record_cache_delete(removed);
                removed as usize
            }
            Err(e) => {
                warn!(error = %e, keys = keys.len(), "cache delete failed");
                self.metrics.record_cache_degraded();
                0
            }
        }
    }

    /// Drop expired keys from the index and ask the backend to purge its own.
    ///
    /// Returns how many backend entries were purged.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.index.retain(|_, keys| {
            keys.retain(|_, expires_at| !is_expired(*expires_at, now));
            !keys.is_empty()
        });

        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };
        match backend.purge_expired().await {
            Ok(purged) => {
                if purged > 0 {
                    debug!(purged, "expired cache entries purged");
                }
                purged
            }
            Err(e) => {
                warn!(error = %e, "cache purge failed");
                self.metrics.record_cache_degraded();
                0
            }
        }
    }

    /// Number of live-or-unswept keys indexed under `resource`.
    pub fn indexed_keys(&self, resource: &str) -> usize {
        self.index.get(resource).map_or(0, |keys| keys.len())
    }

    /// Cache-aside read.
    ///
    /// On a hit returns the cached value without calling `compute`. On a miss
    /// awaits `compute`, stores its result under `key` for `ttl` and returns
    /// it. Errors from `compute` propagate and nothing is cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        debug!(key, "cache miss, computing from source");
        let value = compute().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// [`get_or_compute`](Self::get_or_compute) with the default TTL.
    pub async fn get_or_compute_default<T, E, F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.get_or_compute(key, self.default_ttl, compute).await
    }
}

/// Shared cache handle.
pub type SharedCache = Arc<Cache>;

/// Invalidation hook that drops cache resources and key patterns when a
/// watched table changes.
pub struct CacheInvalidation {
    cache: SharedCache,
    resources: Vec<String>,
    patterns: Vec<String>,
}

impl CacheInvalidation {
    pub fn new(cache: SharedCache) -> Self {
        Self {
            cache,
            resources: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// Drop every indexed key of `resource`.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// Drop every key matching `pattern`.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }
}

#[async_trait]
impl InvalidationHook for CacheInvalidation {
    async fn invalidate(&self, table: &str) -> Result<()> {
        let mut removed = 0;
        for resource in &self.resources {
            removed += self.cache.invalidate_resource(resource).await;
        }
        for pattern in &self.patterns {
            removed += self.cache.delete_matching(pattern).await;
        }
        debug!(table, removed, "cache invalidated for table change");
        Ok(())
    }
}
