//! Per-mode pools of reusable storage handles.
//!
//! Each connection mode has its own idle set and size accounting. All pool
//! bookkeeping sits behind one lock that is never held across I/O: slots are
//! reserved under the lock, connections are created or probed outside it,
//! and the result is committed under the lock again.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::domain::errors::{DbError, DbResult, StorageError};
use crate::domain::models::{
    AlertSeverity, ConnectionMode, PoolConfig, Query, Row, SecurityAlert, SecurityEventKind,
};
use crate::domain::ports::{ConnectionFactory, HealthProbe, StorageConnection};
use crate::services::alert_dispatcher::AlertDispatcher;

const fn slot(mode: ConnectionMode) -> usize {
    match mode {
        ConnectionMode::Direct => 0,
        ConnectionMode::Session => 1,
        ConnectionMode::Transaction => 2,
    }
}

/// Health metadata kept for every pooled handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_check: None,
            latency_ms: None,
            error_count: 0,
            last_error: None,
        }
    }
}

/// A storage handle owned by the pool.
///
/// At any instant a handle is either idle in its mode's pool or borrowed by
/// exactly one caller through a [`ConnectionLease`].
pub struct PooledConnection {
    id: u64,
    mode: ConnectionMode,
    handle: Box<dyn StorageConnection>,
    health: ConnectionHealth,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
}

impl PooledConnection {
    fn new(id: u64, mode: ConnectionMode, handle: Box<dyn StorageConnection>) -> Self {
        let now = Instant::now();
        Self {
            id,
            mode,
            handle,
            health: ConnectionHealth::default(),
            created_at: now,
            last_used: now,
            use_count: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    /// Run a query on this handle, recording errors in its health metadata.
    pub async fn execute(&mut self, query: &Query) -> Result<Vec<Row>, StorageError> {
        self.use_count += 1;
        let result = self.handle.execute(query).await;
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    async fn probe(&mut self, timeout: Duration) -> Result<Duration, StorageError> {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.handle.probe()).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout),
        };
        let elapsed = start.elapsed();
        self.health.last_check = Some(Utc::now());
        match outcome {
            Ok(()) => {
                self.health.latency_ms = Some(elapsed.as_secs_f64() * 1000.0);
                Ok(elapsed)
            }
            Err(e) => {
                self.record_error(&e);
                self.health.is_healthy = false;
                Err(e)
            }
        }
    }

    fn record_error(&mut self, error: &StorageError) {
        self.health.error_count += 1;
        self.health.last_error = Some(error.to_string());
        if error.is_connection() {
            self.health.is_healthy = false;
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("health", &self.health)
            .field("use_count", &self.use_count)
            .finish()
    }
}

/// A borrowed connection.
///
/// Give it back with [`ConnectionLease::release`]. A lease dropped without
/// an explicit release is returned as failed.
pub struct ConnectionLease {
    pool: Arc<PoolInner>,
    conn: Option<PooledConnection>,
}

impl ConnectionLease {
    pub fn mode(&self) -> ConnectionMode {
        self.conn.as_ref().map_or(ConnectionMode::Direct, |c| c.mode)
    }

    pub fn id(&self) -> u64 {
        self.conn.as_ref().map_or(0, |c| c.id)
    }

    pub fn connection(&self) -> Option<&PooledConnection> {
        self.conn.as_ref()
    }

    pub async fn execute(&mut self, query: &Query) -> Result<Vec<Row>, StorageError> {
        match self.conn.as_mut() {
            Some(conn) => conn.execute(query).await,
            None => Err(StorageError::Connection("lease already released".into())),
        }
    }

    /// Return the connection to its pool.
    pub fn release(mut self, succeeded: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, succeeded);
        }
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(connection_id = conn.id, mode = %conn.mode, "lease dropped without release");
            self.pool.release(conn, false);
        }
    }
}

#[derive(Default)]
struct ModePool {
    idle: VecDeque<PooledConnection>,
    /// Idle + borrowed + slots reserved for connections being created.
    total: usize,
}

struct PoolState {
    pools: [ModePool; 3],
    closed: bool,
}

impl PoolState {
    fn pool(&mut self, mode: ConnectionMode) -> &mut ModePool {
        &mut self.pools[slot(mode)]
    }
}

#[derive(Default)]
struct AtomicModeStats {
    created: AtomicU64,
    closed: AtomicU64,
    acquisitions: AtomicU64,
    exhausted: AtomicU64,
    wait_ms_total: AtomicU64,
    create_failures: AtomicU64,
    failed_releases: AtomicU64,
    health_check_failures: AtomicU64,
}

/// Snapshot of one mode's pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModePoolStats {
    pub mode: ConnectionMode,
    pub min_size: usize,
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub total: usize,
    pub created: u64,
    pub closed: u64,
    pub acquisitions: u64,
    pub exhausted: u64,
    pub avg_wait_ms: f64,
    pub create_failures: u64,
    pub failed_releases: u64,
    pub health_check_failures: u64,
}

/// Snapshot of every pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub backend: String,
    pub connected: bool,
    pub closed: bool,
    pub modes: Vec<ModePoolStats>,
}

impl PoolStats {
    pub fn mode(&self, mode: ConnectionMode) -> Option<&ModePoolStats> {
        self.modes.iter().find(|m| m.mode == mode)
    }
}

/// Result of one maintenance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub probed: usize,
    pub probe_failures: usize,
    pub expired: usize,
    pub created: usize,
    pub create_failures: usize,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    notify: [Notify; 3],
    stats: [AtomicModeStats; 3],
    alerts: Arc<AlertDispatcher>,
    next_id: AtomicU64,
    connected: AtomicBool,
}

impl PoolInner {
    fn release(&self, mut conn: PooledConnection, succeeded: bool) {
        let mode = conn.mode;
        let stats = &self.stats[slot(mode)];
        conn.last_used = Instant::now();

        let discarded = {
            let mut state = self.state.lock();
            let closed = state.closed;
            let pool = state.pool(mode);
            if succeeded && conn.health.is_healthy && mode.is_pooled() && !closed {
                pool.idle.push_back(conn);
                None
            } else {
                pool.total = pool.total.saturating_sub(1);
                Some(conn)
            }
        };

        if let Some(mut conn) = discarded {
            if !succeeded {
                conn.health.is_healthy = false;
                stats.failed_releases.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    connection_id = conn.id,
                    mode = %mode,
                    error_count = conn.health.error_count,
                    "connection released after failure, removed from rotation"
                );
            }
            stats.closed.fetch_add(1, Ordering::Relaxed);
            drop(conn);
        }
        self.notify[slot(mode)].notify_one();
    }

    fn reserve_slot(&self, mode: ConnectionMode) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        let max = self.config.for_mode(mode).max_size;
        let pool = state.pool(mode);
        if pool.total < max {
            pool.total += 1;
            true
        } else {
            false
        }
    }

    fn unreserve_slot(&self, mode: ConnectionMode) {
        {
            let mut state = self.state.lock();
            let pool = state.pool(mode);
            pool.total = pool.total.saturating_sub(1);
        }
        self.notify[slot(mode)].notify_one();
    }

    /// Create a handle for a slot already reserved by the caller.
    async fn create(&self, mode: ConnectionMode, timeout: Duration) -> DbResult<PooledConnection> {
        let stats = &self.stats[slot(mode)];
        let result = match tokio::time::timeout(timeout, self.factory.connect(mode)).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(e)) => Err(DbError::ConnectionCreateFailed {
                mode,
                reason: e.to_string(),
            }),
            Err(_) => Err(DbError::TimedOut {
                operation: format!("connect ({mode})"),
                after_ms: timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(handle) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                stats.created.fetch_add(1, Ordering::Relaxed);
                self.connected.store(true, Ordering::Relaxed);
                tracing::debug!(connection_id = id, mode = %mode, "connection created");
                Ok(PooledConnection::new(id, mode, handle))
            }
            Err(e) => {
                stats.create_failures.fetch_add(1, Ordering::Relaxed);
                self.connected.store(false, Ordering::Relaxed);
                self.unreserve_slot(mode);
                tracing::warn!(mode = %mode, error = %e, "failed to create connection");
                Err(e)
            }
        }
    }

    /// Create connections until every pool holds at least its minimum.
    async fn top_up(&self, report: &mut MaintenanceReport) -> Option<DbError> {
        let mut last_error = None;
        for mode in ConnectionMode::ALL {
            let min = self.config.for_mode(mode).min_size;
            if !mode.is_pooled() || min == 0 {
                continue;
            }

            let needed = {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                let pool = state.pool(mode);
                let needed = min.saturating_sub(pool.total);
                pool.total += needed;
                needed
            };

            for _ in 0..needed {
                match self.create(mode, self.config.acquire_timeout()).await {
                    Ok(conn) => {
                        report.created += 1;
                        self.release(conn, true);
                    }
                    Err(e) => {
                        report.create_failures += 1;
                        last_error = Some(e);
                    }
                }
            }
        }
        last_error
    }
}

/// Owns one pool per connection mode.
///
/// Cheap to clone; clones share the same pools.
#[derive(Clone)]
pub struct PoolManager {
    inner: Arc<PoolInner>,
    maintenance: Arc<Mutex<Option<(broadcast::Sender<()>, JoinHandle<()>)>>>,
}

impl PoolManager {
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState {
                    pools: Default::default(),
                    closed: false,
                }),
                notify: Default::default(),
                stats: Default::default(),
                alerts,
                next_id: AtomicU64::new(1),
                connected: AtomicBool::new(false),
            }),
            maintenance: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrow a connection for `mode`.
    ///
    /// Reuses a healthy idle handle, otherwise creates one while below the
    /// mode's maximum, otherwise waits for a release. Fails with
    /// `PoolExhausted` once `timeout` (default: the configured acquire
    /// timeout) has passed without a connection becoming available.
    pub async fn acquire(
        &self,
        mode: ConnectionMode,
        timeout: Option<Duration>,
    ) -> DbResult<ConnectionLease> {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.acquire_timeout());
        let started = Instant::now();
        let deadline = started + timeout;
        let stats = &self.inner.stats[slot(mode)];
        let max = self.inner.config.for_mode(mode).max_size;

        loop {
            let mut discarded = Vec::new();
            let step = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    Step::Closed
                } else {
                    let pool = state.pool(mode);
                    let mut reuse = None;
                    while let Some(conn) = pool.idle.pop_back() {
                        if conn.health.is_healthy {
                            reuse = Some(conn);
                            break;
                        }
                        pool.total = pool.total.saturating_sub(1);
                        discarded.push(conn);
                    }
                    match reuse {
                        Some(conn) => Step::Reuse(conn),
                        None if pool.total < max => {
                            pool.total += 1;
                            Step::Create
                        }
                        None => Step::Wait,
                    }
                }
            };
            if !discarded.is_empty() {
                stats
                    .closed
                    .fetch_add(discarded.len() as u64, Ordering::Relaxed);
                drop(discarded);
            }

            let conn = match step {
                Step::Reuse(conn) => conn,
                Step::Create => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.inner.create(mode, remaining.max(Duration::from_millis(1))).await?
                }
                Step::Closed => {
                    return Err(DbError::PoolExhausted {
                        mode,
                        waited_ms: started.elapsed().as_millis() as u64,
                    })
                }
                Step::Wait => {
                    let now = Instant::now();
                    if now >= deadline {
                        let waited_ms = started.elapsed().as_millis() as u64;
                        stats.exhausted.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(mode = %mode, waited_ms, max_size = max, "connection pool exhausted");
                        return Err(DbError::PoolExhausted { mode, waited_ms });
                    }
                    let wait = (deadline - now).min(self.inner.config.wait_poll_interval());
                    let _ = tokio::time::timeout(wait, self.inner.notify[slot(mode)].notified()).await;
                    continue;
                }
            };

            stats.acquisitions.fetch_add(1, Ordering::Relaxed);
            stats
                .wait_ms_total
                .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
            return Ok(ConnectionLease {
                pool: self.inner.clone(),
                conn: Some(conn),
            });
        }
    }

    /// Return a borrowed connection; equivalent to `lease.release(succeeded)`.
    pub fn release(&self, lease: ConnectionLease, succeeded: bool) {
        lease.release(succeeded);
    }

    /// Bring every pool up to its minimum size.
    pub async fn warm_up(&self) -> DbResult<()> {
        let mut report = MaintenanceReport::default();
        match self.inner.top_up(&mut report).await {
            Some(e) => Err(e),
            None => {
                tracing::info!(created = report.created, "connection pools warmed up");
                Ok(())
            }
        }
    }

    /// Probe idle handles, drop broken or expired ones and top pools up.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let inner = &self.inner;
        let mut report = MaintenanceReport::default();

        for mode in ConnectionMode::ALL {
            let cfg = inner.config.for_mode(mode);
            let stats = &inner.stats[slot(mode)];
            // Handles are probed one at a time so concurrent acquires still
            // find the rest of the idle set.
            let pending = inner.state.lock().pool(mode).idle.len();
            for _ in 0..pending {
                let Some(mut conn) = inner.state.lock().pool(mode).idle.pop_front() else {
                    break;
                };

                report.probed += 1;
                let ok = conn.probe(inner.config.probe_timeout()).await.is_ok();
                if !ok {
                    report.probe_failures += 1;
                    stats.health_check_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        connection_id = conn.id,
                        mode = %mode,
                        error = conn.health.last_error.as_deref().unwrap_or("unknown"),
                        "idle connection failed health probe"
                    );
                }

                let keep = {
                    let mut state = inner.state.lock();
                    let closed = state.closed;
                    let pool = state.pool(mode);
                    let expired = conn.idle_for() >= cfg.idle_timeout() && pool.total > cfg.min_size;
                    if !ok || expired || closed {
                        if ok && expired {
                            report.expired += 1;
                        }
                        pool.total = pool.total.saturating_sub(1);
                        false
                    } else {
                        pool.idle.push_back(conn);
                        true
                    }
                };
                if keep {
                    inner.notify[slot(mode)].notify_one();
                } else {
                    stats.closed.fetch_add(1, Ordering::Relaxed);
                    inner.notify[slot(mode)].notify_waiters();
                }
            }
        }

        inner.top_up(&mut report).await;

        if report.probe_failures > 0 && report.probe_failures >= inner.config.probe_failure_alert_threshold {
            let alert = SecurityAlert::new(
                SecurityEventKind::ConnectionFailure,
                AlertSeverity::High,
                format!(
                    "{} idle connections failed health probes in one maintenance cycle",
                    report.probe_failures
                ),
            )
            .with_detail("probe_failures", report.probe_failures)
            .with_detail("probed", report.probed)
            .with_detail("backend", inner.factory.backend_name());
            inner.alerts.dispatch(alert).await;
        }

        tracing::debug!(
            probed = report.probed,
            probe_failures = report.probe_failures,
            expired = report.expired,
            created = report.created,
            "pool maintenance cycle finished"
        );
        report
    }

    /// Start the periodic maintenance loop. Does nothing if already running.
    pub fn start_maintenance(&self) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let pool = self.clone();
        let period = self.inner.config.maintenance_interval().max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            interval.tick().await;

            tracing::info!(interval_ms = period.as_millis() as u64, "pool maintenance started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        pool.run_maintenance().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("pool maintenance stopped");
                        break;
                    }
                }
            }
        });

        *slot = Some((shutdown_tx, handle));
    }

    /// Stop the maintenance loop and wait for it to exit.
    pub async fn stop_maintenance(&self) {
        let running = self.maintenance.lock().take();
        if let Some((shutdown_tx, handle)) = running {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "pool maintenance task failed");
            }
        }
    }

    /// Drop every idle handle and re-create the minimum sets.
    pub async fn reconnect(&self) -> DbResult<()> {
        let dropped: Vec<PooledConnection> = {
            let mut state = self.inner.state.lock();
            let mut dropped = Vec::new();
            for mode in ConnectionMode::ALL {
                let pool = state.pool(mode);
                pool.total = pool.total.saturating_sub(pool.idle.len());
                dropped.extend(pool.idle.drain(..));
            }
            dropped
        };
        for conn in &dropped {
            self.inner.stats[slot(conn.mode)]
                .closed
                .fetch_add(1, Ordering::Relaxed);
        }
        tracing::info!(dropped = dropped.len(), "reconnecting connection pools");
        drop(dropped);

        self.warm_up().await?;
        self.probe().await.map(|_| ())
    }

    /// Close idle handles and refuse further acquisitions.
    pub async fn shutdown(&self) {
        self.stop_maintenance().await;
        let dropped: Vec<PooledConnection> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let mut dropped = Vec::new();
            for mode in ConnectionMode::ALL {
                let pool = state.pool(mode);
                pool.total = pool.total.saturating_sub(pool.idle.len());
                dropped.extend(pool.idle.drain(..));
            }
            dropped
        };
        for conn in &dropped {
            self.inner.stats[slot(conn.mode)]
                .closed
                .fetch_add(1, Ordering::Relaxed);
        }
        for notify in &self.inner.notify {
            notify.notify_waiters();
        }
        self.inner.connected.store(false, Ordering::Relaxed);
        tracing::info!(closed = dropped.len(), "connection pools shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let sizes: Vec<(usize, usize)> = {
            let mut state = self.inner.state.lock();
            ConnectionMode::ALL
                .iter()
                .map(|m| {
                    let pool = state.pool(*m);
                    (pool.idle.len(), pool.total)
                })
                .collect()
        };

        let modes = ConnectionMode::ALL
            .iter()
            .zip(sizes)
            .map(|(mode, (idle, total))| {
                let cfg = self.inner.config.for_mode(*mode);
                let s = &self.inner.stats[slot(*mode)];
                let acquisitions = s.acquisitions.load(Ordering::Relaxed);
                let wait_total = s.wait_ms_total.load(Ordering::Relaxed);
                ModePoolStats {
                    mode: *mode,
                    min_size: cfg.min_size,
                    max_size: cfg.max_size,
                    idle,
                    in_use: total.saturating_sub(idle),
                    total,
                    created: s.created.load(Ordering::Relaxed),
                    closed: s.closed.load(Ordering::Relaxed),
                    acquisitions,
                    exhausted: s.exhausted.load(Ordering::Relaxed),
                    avg_wait_ms: if acquisitions == 0 {
                        0.0
                    } else {
                        wait_total as f64 / acquisitions as f64
                    },
                    create_failures: s.create_failures.load(Ordering::Relaxed),
                    failed_releases: s.failed_releases.load(Ordering::Relaxed),
                    health_check_failures: s.health_check_failures.load(Ordering::Relaxed),
                }
            })
            .collect();

        PoolStats {
            backend: self.inner.factory.backend_name().to_string(),
            connected: self.inner.connected.load(Ordering::Relaxed),
            closed: self.is_closed(),
            modes,
        }
    }
}

enum Step {
    Reuse(PooledConnection),
    Create,
    Wait,
    Closed,
}

#[async_trait::async_trait]
impl HealthProbe for PoolManager {
    /// Borrow a Direct handle and time one probe round-trip on it.
    async fn probe(&self) -> DbResult<Duration> {
        let timeout = self.inner.config.probe_timeout();
        let mut lease = self.acquire(ConnectionMode::Direct, Some(timeout)).await?;
        let result = match lease.conn.as_mut() {
            Some(conn) => conn.probe(timeout).await,
            None => Err(StorageError::Connection("lease already released".into())),
        };
        match result {
            Ok(elapsed) => {
                self.inner.connected.store(true, Ordering::Relaxed);
                lease.release(true);
                Ok(elapsed)
            }
            Err(e) => {
                self.inner.connected.store(false, Ordering::Relaxed);
                lease.release(false);
                Err(if matches!(e, StorageError::Timeout) {
                    DbError::TimedOut {
                        operation: "probe".into(),
                        after_ms: timeout.as_millis() as u64,
                    }
                } else {
                    DbError::storage(crate::domain::models::OperationKind::Probe, "", e)
                })
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed) && !self.is_closed()
    }

    async fn reconnect(&self) -> DbResult<()> {
        PoolManager::reconnect(self).await
    }

    fn details(&self) -> BTreeMap<String, Value> {
        let stats = self.stats();
        let mut details = BTreeMap::new();
        details.insert("backend".to_string(), Value::from(stats.backend));
        for m in stats.modes {
            details.insert(format!("{}_idle", m.mode), Value::from(m.idle));
            details.insert(format!("{}_in_use", m.mode), Value::from(m.in_use));
        }
        details
    }
}
