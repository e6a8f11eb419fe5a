//! Synchronization metrics.
//!
//! Counters for poller lifecycle, tick outcomes, subscriptions and cache
//! activity, exported in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Central registry for engine metrics.
pub struct SyncMetrics {
    started_at: Instant,

    // Poller lifecycle
    poller_starts: AtomicU64,
    poller_stops: AtomicU64,
    poller_self_stops: AtomicU64,
    poller_start_failures: AtomicU64,

    // Ticks
    ticks: AtomicU64,
    idle_ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    failed_ticks: AtomicU64,
    changes_seen: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,

    // Subscriptions
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
    disconnects: AtomicU64,
    snapshot_failures: AtomicU64,

    // Cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_sets: AtomicU64,
    cache_deletes: AtomicU64,
    cache_degraded: AtomicU64,
}

impl SyncMetrics {
    /// Create a new registry with every counter at zero.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            poller_starts: AtomicU64::new(0),
            poller_stops: AtomicU64::new(0),
            poller_self_stops: AtomicU64::new(0),
            poller_start_failures: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            changes_seen: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            subscribes: AtomicU64::new(0),
            unsubscribes: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_sets: AtomicU64::new(0),
            cache_deletes: AtomicU64::new(0),
            cache_degraded: AtomicU64::new(0),
        }
    }

    pub fn record_poller_start(&self) {
        self.poller_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poller_stop(&self) {
        self.poller_stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poller_self_stop(&self) {
        self.poller_self_stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poller_start_failure(&self) {
        self.poller_start_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick that found no changes.
    pub fn record_idle_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick skipped because the previous one was still running.
    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick that broadcast a snapshot to `delivered` connections.
    pub fn record_broadcast(&self, changes: u64, delivered: u64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.changes_seen.fetch_add(changes, Ordering::Relaxed);
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered, Ordering::Relaxed);
    }

    pub fn record_subscribe(&self) {
        self.subscribes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsubscribe(&self) {
        self.unsubscribes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_set(&self) {
        self.cache_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_delete(&self, keys: u64) {
        self.cache_deletes.fetch_add(keys, Ordering::Relaxed);
    }

    /// Record a cache operation that failed and was degraded to a miss/no-op.
    pub fn record_cache_degraded(&self) {
        self.cache_degraded.fetch_add(1, Ordering::Relaxed);
    }

    // Getters

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn poller_starts(&self) -> u64 {
        self.poller_starts.load(Ordering::Relaxed)
    }

    pub fn poller_stops(&self) -> u64 {
        self.poller_stops.load(Ordering::Relaxed)
    }

    pub fn poller_self_stops(&self) -> u64 {
        self.poller_self_stops.load(Ordering::Relaxed)
    }

    pub fn poller_start_failures(&self) -> u64 {
        self.poller_start_failures.load(Ordering::Relaxed)
    }

    /// Pollers started and not yet stopped by either path.
    pub fn active_pollers(&self) -> u64 {
        self.poller_starts()
            .saturating_sub(self.poller_stops() + self.poller_self_stops())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks.load(Ordering::Relaxed)
    }

    pub fn changes_seen(&self) -> u64 {
        self.changes_seen.load(Ordering::Relaxed)
    }

    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    pub fn subscribes(&self) -> u64 {
        self.subscribes.load(Ordering::Relaxed)
    }

    pub fn unsubscribes(&self) -> u64 {
        self.unsubscribes.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    pub fn snapshot_failures(&self) -> u64 {
        self.snapshot_failures.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn cache_sets(&self) -> u64 {
        self.cache_sets.load(Ordering::Relaxed)
    }

    pub fn cache_deletes(&self) -> u64 {
        self.cache_deletes.load(Ordering::Relaxed)
    }

    pub fn cache_degraded(&self) -> u64 {
        self.cache_degraded.load(Ordering::Relaxed)
    }

    /// Get cache hit rate (0.0 - 1.0).
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits() as f64;
        let total = hits + self.cache_misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    /// Export to Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let mut gauge = |name: &str, help: &str, value: String| {
            out.push_str(&format!("# HELP linesync_{} {}\n", name, help));
            out.push_str(&format!("# TYPE linesync_{} gauge\n", name));
            out.push_str(&format!("linesync_{} {}\n\n", name, value));
        };
        gauge("uptime_seconds", "Process uptime in seconds", self.uptime_secs().to_string());
        gauge("active_pollers", "Change pollers currently running", self.active_pollers().to_string());
        gauge("cache_hit_rate", "Cache hit rate", format!("{:.4}", self.cache_hit_rate()));

        let counters: [(&str, &str, u64); 17] = [
            ("poller_starts_total", "Change poller starts", self.poller_starts()),
            ("poller_stops_total", "Change poller explicit stops", self.poller_stops()),
            ("poller_self_stops_total", "Change poller stops after the failure ceiling", self.poller_self_stops()),
            ("poller_start_failures_total", "Change poller initialization failures", self.poller_start_failures()),
            ("ticks_total", "Poll ticks executed", self.ticks()),
            ("idle_ticks_total", "Poll ticks that found no changes", self.idle_ticks()),
            ("skipped_ticks_total", "Poll ticks skipped while the previous tick ran", self.skipped_ticks()),
            ("failed_ticks_total", "Poll ticks that failed", self.failed_ticks()),
            ("changes_total", "Change-tracking rows observed", self.changes_seen()),
            ("broadcasts_total", "Snapshots broadcast to topic rooms", self.broadcasts()),
            ("deliveries_total", "Snapshot messages delivered to connections", self.deliveries()),
            ("subscribes_total", "Topic subscriptions", self.subscribes()),
            ("unsubscribes_total", "Topic unsubscriptions", self.unsubscribes()),
            ("snapshot_failures_total", "Initial snapshot failures", self.snapshot_failures()),
            ("cache_hits_total", "Cache hits", self.cache_hits()),
            ("cache_misses_total", "Cache misses", self.cache_misses()),
            ("cache_degraded_total", "Cache operations degraded by backing-store failures", self.cache_degraded()),
        ];

        for (name, help, value) in counters {
            out.push_str(&format!("# HELP linesync_{} {}\n", name, help));
            out.push_str(&format!("# TYPE linesync_{} counter\n", name));
            out.push_str(&format!("linesync_{} {}\n\n", name, value));
        }

        out
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics handle.
pub type SharedMetrics = Arc<SyncMetrics>;

/// Create a new shared metrics registry.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(SyncMetrics::new())
}
