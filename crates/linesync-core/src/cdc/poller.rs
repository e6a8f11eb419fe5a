//! Interval-driven change poller for one table.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{InvalidationHook, PollerStatus, SnapshotQuery, TickOutcome};
use crate::config::{DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_POLL_INTERVAL_MS};
use crate::error::Result;
use crate::metrics::{SharedMetrics, SyncMetrics};
use crate::store::{ChangeSource, CursorStore};
use crate::transport::Transport;

/// Handle to the spawned timer loop.
struct RunHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Transient per-process state; `run` is `Some` exactly while `Running`.
struct RuntimeState {
    status: PollerStatus,
    /// Last version processed, as loaded at start and advanced by ticks.
    cursor: u64,
    failures: u32,
    /// Incremented on every start so a stale loop cannot touch a newer run.
    generation: u64,
    run: Option<RunHandle>,
}

/// Watches one table and broadcasts a fresh snapshot whenever it changes.
///
/// `start` and `stop` are idempotent. Ticks never overlap: a tick that finds
/// the previous one still in flight is skipped. After
/// `max_failures` consecutive failed ticks the poller stops itself; a later
/// `start` resumes from the durable cursor.
pub struct ChangePoller {
    table: String,
    room: String,
    event: String,
    interval: Duration,
    max_failures: u32,
    source: Arc<dyn ChangeSource>,
    cursors: Arc<dyn CursorStore>,
    query: Arc<dyn SnapshotQuery>,
    hook: Option<Arc<dyn InvalidationHook>>,
    transport: Arc<dyn Transport>,
    metrics: SharedMetrics,
    state: Mutex<RuntimeState>,
    /// Serializes start and stop against each other.
    lifecycle: tokio::sync::Mutex<()>,
    /// Held for the duration of a tick.
    tick_guard: tokio::sync::Mutex<()>,
}

impl ChangePoller {
    /// Create a poller for `table` broadcasting `<table>:update` to room `table`.
    pub fn new(
        table: impl Into<String>,
        source: Arc<dyn ChangeSource>,
        cursors: Arc<dyn CursorStore>,
        query: Arc<dyn SnapshotQuery>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let table = table.into();
        Self {
            room: table.clone(),
            event: format!("{}:update", table),
            table,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            source,
            cursors,
            query,
            hook: None,
            transport,
            metrics: Arc::new(SyncMetrics::new()),
            state: Mutex::new(RuntimeState {
                status: PollerStatus::Idle,
                cursor: 0,
                failures: 0,
                generation: 0,
                run: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Broadcast to `room` instead of the table name.
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }

    /// Broadcast under `event`.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn InvalidationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Consecutive failed ticks tolerated before self-stop (at least 1).
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn status(&self) -> PollerStatus {
        self.state.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == PollerStatus::Running
    }

    /// In-memory cursor.
    pub fn cursor(&self) -> u64 {
        self.state.lock().cursor
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().failures
    }

    /// Compute the snapshot without broadcasting it.
    pub async fn snapshot(&self) -> Result<Value> {
        self.query.snapshot().await
    }

    /// Load the durable cursor and arm the timer.
    ///
    /// Returns `Ok(false)` if already running. A cursor load failure leaves
    /// the poller in its previous state and is returned to the caller.
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            debug!(table = %self.table, "poller already running");
            return Ok(false);
        }

        let loaded = match self.cursors.load(&self.table).await {
            Ok(cursor) => cursor.unwrap_or(0),
            Err(e) => {
                self.metrics.record_poller_start_failure();
                error!(table = %self.table, error = %e, "failed to load cursor, poller not started");
                return Err(e);
            }
        };

        let cursor = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.cursor = state.cursor.max(loaded);
            state.failures = 0;
            state.status = PollerStatus::Running;

            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(Arc::clone(self).run(state.generation, stop_rx));
            state.run = Some(RunHandle { stop_tx, handle });
            state.cursor
        };

        self.metrics.record_poller_start();
        info!(
            table = %self.table,
            topic = %self.room,
            cursor,
            interval_ms = self.interval.as_millis() as u64,
            "poller started"
        );
        Ok(true)
    }

    /// Disarm the timer. An in-flight tick runs to completion.
    ///
    /// Returns `false` if the poller was not running.
    pub async fn stop(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        self.halt().is_some()
    }

    /// Like [`stop`](Self::stop), then wait for the timer loop to exit.
    pub async fn stop_and_wait(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(run) = self.halt() else {
            return false;
        };
        if let Err(e) = run.handle.await {
            warn!(table = %self.table, error = %e, "poller task panicked");
        }
        true
    }

    fn halt(&self) -> Option<RunHandle> {
        let run = {
            let mut state = self.state.lock();
            if state.status != PollerStatus::Running {
                return None;
            }
            state.status = PollerStatus::Stopped;
            state.failures = 0;
            state.run.take()
        }?;

        run.stop_tx.send_replace(true);
        self.metrics.record_poller_stop();
        info!(table = %self.table, topic = %self.room, "poller stopped");
        Some(run)
    }

    async fn run(self: Arc<Self>, generation: u64, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => break,
            }
            if *stop_rx.borrow() {
                break;
            }

            let result = self.tick().await;
            if !self.settle(generation, result) {
                break;
            }
        }

        debug!(table = %self.table, generation, "poller loop exited");
    }

    /// Apply a tick result to the failure counter. Returns whether the loop
    /// of `generation` keeps running.
    fn settle(&self, generation: u64, result: Result<TickOutcome>) -> bool {
        if result.is_err() {
            self.metrics.record_failed_tick();
        }

        let mut state = self.state.lock();
        if state.generation != generation || state.status != PollerStatus::Running {
            return false;
        }

        let e = match result {
            Ok(TickOutcome::Skipped) => return true,
            Ok(_) => {
                state.failures = 0;
                return true;
            }
            Err(e) => e,
        };

        state.failures += 1;
        if state.failures < self.max_failures {
            warn!(
                table = %self.table,
                failures = state.failures,
                max_failures = self.max_failures,
                error = %e,
                "poll tick failed"
            );
            return true;
        }

        state.status = PollerStatus::Stopped;
        state.failures = 0;
        state.run = None;
        self.metrics.record_poller_self_stop();
        error!(
            table = %self.table,
            topic = %self.room,
            max_failures = self.max_failures,
            error = %e,
            "poller reached failure ceiling, stopping until next subscribe"
        );
        false
    }

    /// Run one poll cycle.
    ///
    /// On a non-empty delta the cursor is persisted, then the invalidation
    /// hook runs, then the snapshot is computed and broadcast to the room's
    /// current members. The in-memory cursor only advances once the save
    /// succeeds.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            self.metrics.record_skipped_tick();
            debug!(table = %self.table, "previous tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };

        let since = self.state.lock().cursor;
        let changes = self.source.changes_since(&self.table, since).await?;

        let fresh = changes.iter().filter(|c| c.version > since);
        let count = fresh.clone().count();
        let Some(version) = fresh.map(|c| c.version).max() else {
            self.metrics.record_idle_tick();
            debug!(table = %self.table, cursor = since, "no changes");
            return Ok(TickOutcome::Idle);
        };

        self.cursors.save(&self.table, version).await?;
        {
            let mut state = self.state.lock();
            state.cursor = state.cursor.max(version);
        }

        if let Some(hook) = &self.hook {
            hook.invalidate(&self.table).await?;
        }

        let snapshot = self.query.snapshot().await?;
        let delivered = self.transport.emit_to_room(&self.room, &self.event, &snapshot);

        self.metrics.record_broadcast(count as u64, delivered as u64);
        info!(
            table = %self.table,
            topic = %self.room,
            changes = count,
            version,
            delivered,
            "broadcast snapshot"
        );

        Ok(TickOutcome::Broadcast {
            changes: count,
            version,
            delivered,
        })
    }
}
