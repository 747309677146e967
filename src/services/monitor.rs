//! Health and security monitoring with auto-recovery.
//!
//! Two periodic loops run as independent tasks:
//!
//! - the health loop probes the backend, classifies the response time and
//!   triggers auto-recovery when the backend is Critical and disconnected;
//! - the security loop inspects recently finished executions from the
//!   [`QueryTracker`] and raises alerts through the shared
//!   [`AlertDispatcher`].
//!
//! Both loops stop through a broadcast shutdown channel and
//! [`Monitor::stop`] waits for them to exit.

use parking_lot::Mutex;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::domain::errors::FailureKind;
use crate::domain::models::{
    AlertSeverity, HealthCheckResult, HealthStatus, MonitorConfig, QueryExecution, SecurityAlert,
    SecurityEventKind,
};
use crate::domain::ports::{AlertCallback, HealthProbe};
use crate::services::alert_dispatcher::AlertDispatcher;
use crate::services::query_tracker::QueryTracker;

/// Statement shapes flagged as likely injection attempts.
const SUSPICIOUS_PATTERNS: &[&str] = &[
    r"(?i)\bunion\b(\s+all)?\s+select\b",
    r"(?i);\s*(drop|truncate|alter)\s+",
    r"(?i)\bdrop\s+(table|database|schema)\b",
    r"(?i)\bor\b\s+'?\d+'?\s*=\s*'?\d+'?",
    r"(?i)'\s*or\s+'[^']*'\s*=\s*'",
    r"'\s*--",
    r"(?i)\b(pg_sleep|waitfor\s+delay|sleep\s*\()",
    r"(?i)\binformation_schema\b|\bsqlite_master\b",
];

/// Statements quoted in a SuspiciousQuery alert.
const MAX_QUOTED_STATEMENTS: usize = 5;

/// Snapshot returned by [`Monitor::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub running: bool,
    pub connected: bool,
    pub last_health: Option<HealthCheckResult>,
    pub recent_alerts: Vec<SecurityAlert>,
    pub health_checks: u64,
    pub security_checks: u64,
    pub alerts_dispatched: u64,
    pub failed_deliveries: u64,
    pub suppressed_alerts: u64,
    pub recovery_attempts: u64,
    pub recoveries_succeeded: u64,
    pub recoveries_failed: u64,
    pub subscribers: usize,
    pub tracked_queries: usize,
}

#[derive(Default)]
struct MonitorCounters {
    health_checks: AtomicU64,
    security_checks: AtomicU64,
    suppressed_alerts: AtomicU64,
    recovery_attempts: AtomicU64,
    recoveries_succeeded: AtomicU64,
    recoveries_failed: AtomicU64,
}

struct RunningLoops {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

/// Clears the in-progress flag when a recovery ends or is abandoned.
struct RecoveryFlag<'a>(&'a AtomicBool);

impl Drop for RecoveryFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Number of recent alerts included in a status snapshot.
const STATUS_RECENT_ALERTS: usize = 10;

pub struct Monitor {
    config: MonitorConfig,
    probe: Arc<dyn HealthProbe>,
    tracker: Arc<QueryTracker>,
    alerts: Arc<AlertDispatcher>,
    suspicious: Option<RegexSet>,
    health_history: Mutex<VecDeque<HealthCheckResult>>,
    last_alerted: Mutex<HashMap<SecurityEventKind, Instant>>,
    recovering: AtomicBool,
    counters: MonitorCounters,
    loops: Mutex<Option<RunningLoops>>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        probe: Arc<dyn HealthProbe>,
        tracker: Arc<QueryTracker>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        let suspicious = match RegexSet::new(SUSPICIOUS_PATTERNS) {
            Ok(set) => Some(set),
            Err(e) => {
                tracing::error!(error = %e, "suspicious query patterns failed to compile");
                None
            }
        };
        let capacity = config.health_history_capacity.max(1);

        Self {
            config,
            probe,
            tracker,
            alerts,
            suspicious,
            health_history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            last_alerted: Mutex::new(HashMap::new()),
            recovering: AtomicBool::new(false),
            counters: MonitorCounters::default(),
            loops: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<QueryTracker> {
        &self.tracker
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().is_some()
    }

    /// Spawn the health and security loops. Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.loops.lock();
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = vec![
            self.spawn_health_loop(shutdown_tx.subscribe()),
            self.spawn_security_loop(shutdown_tx.subscribe()),
        ];

        tracing::info!(
            health_interval_secs = self.config.health_check_interval_secs,
            security_interval_secs = self.config.security_check_interval_secs,
            "monitoring started"
        );
        *slot = Some(RunningLoops {
            shutdown: shutdown_tx,
            handles,
        });
    }

    /// Signal both loops and wait until they have exited.
    pub async fn stop(&self) {
        let running = self.loops.lock().take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(());
        for handle in running.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "monitoring task failed");
            }
        }
        tracing::info!("monitoring stopped");
    }

    fn spawn_health_loop(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let period = self.config.health_check_interval().max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip first tick (fires immediately)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("health loop received shutdown signal");
                        break;
                    }
                }
                // A probe or recovery in flight is abandoned on shutdown.
                tokio::select! {
                    () = monitor.health_cycle() => {}
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("health loop interrupted by shutdown");
                        break;
                    }
                }
            }
        })
    }

    async fn health_cycle(&self) {
        let result = self.run_health_check().await;
        if result.status == HealthStatus::Critical && self.config.auto_recovery && !self.probe.is_connected() {
            self.attempt_recovery().await;
        }
    }

    fn spawn_security_loop(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let period = self.config.security_check_interval().max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("security loop received shutdown signal");
                        break;
                    }
                }
                tokio::select! {
                    _ = monitor.run_security_check(true) => {}
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("security loop interrupted by shutdown");
                        break;
                    }
                }
            }
        })
    }

    /// Probe the backend now and record the result.
    pub async fn manual_health_check(&self) -> HealthCheckResult {
        self.run_health_check().await
    }

    /// Inspect recent executions now, ignoring the alert cooldown.
    ///
    /// Returns every alert raised; each has already been dispatched.
    pub async fn manual_security_check(&self) -> Vec<SecurityAlert> {
        self.run_security_check(false).await
    }

    async fn run_health_check(&self) -> HealthCheckResult {
        let warning = self.config.warning_response();
        let critical = self.config.critical_response();
        let deadline = critical.saturating_mul(2).max(Duration::from_millis(100));
        let started = Instant::now();

        let mut result = match tokio::time::timeout(deadline, self.probe.probe()).await {
            Ok(Ok(elapsed)) => {
                let status = HealthStatus::from_response_time(elapsed, warning, critical);
                let message = match status {
                    HealthStatus::Healthy => "backend responsive".to_string(),
                    _ => format!("backend slow: {}ms", elapsed.as_millis()),
                };
                HealthCheckResult::new(status, elapsed, message)
            }
            Ok(Err(e)) => HealthCheckResult::new(
                HealthStatus::Critical,
                started.elapsed(),
                format!("probe failed: {e}"),
            )
            .with_detail("error", e.to_string()),
            Err(_) => HealthCheckResult::new(
                HealthStatus::Critical,
                started.elapsed(),
                format!("probe timed out after {}ms", deadline.as_millis()),
            ),
        };

        let connected = self.probe.is_connected();
        for (key, value) in self.probe.details() {
            result.details.insert(key, value);
        }
        result = result
            .with_detail("connected", connected)
            .with_detail("warning_ms", self.config.warning_response_ms)
            .with_detail("critical_ms", self.config.critical_response_ms);

        match result.status {
            HealthStatus::Healthy => tracing::debug!(
                response_ms = result.response_time_ms,
                "health check passed"
            ),
            HealthStatus::Warning => tracing::warn!(
                response_ms = result.response_time_ms,
                message = %result.message,
                "health check degraded"
            ),
            HealthStatus::Critical | HealthStatus::Unknown => tracing::error!(
                response_ms = result.response_time_ms,
                connected,
                message = %result.message,
                "health check critical"
            ),
        }

        self.counters.health_checks.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.health_history.lock();
            if history.len() >= self.config.health_history_capacity.max(1) {
                history.pop_front();
            }
            history.push_back(result.clone());
        }
        result
    }

    async fn run_security_check(&self, respect_cooldown: bool) -> Vec<SecurityAlert> {
        let recent = self.tracker.recent(self.config.security_window());
        let rate_limited = self.tracker.take_rate_limited();
        let candidates = self.evaluate(&recent, rate_limited);
        self.counters.security_checks.fetch_add(1, Ordering::Relaxed);

        let mut raised = Vec::with_capacity(candidates.len());
        for alert in candidates {
            if respect_cooldown && self.in_cooldown(alert.kind) {
                self.counters.suppressed_alerts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = alert.kind.as_str(), "alert suppressed by cooldown");
                continue;
            }
            self.last_alerted.lock().insert(alert.kind, Instant::now());
            self.alerts.dispatch(alert.clone()).await;
            raised.push(alert);
        }

        tracing::debug!(
            executions = recent.len(),
            alerts = raised.len(),
            "security check finished"
        );
        raised
    }

    fn in_cooldown(&self, kind: SecurityEventKind) -> bool {
        let cooldown = self.config.alert_cooldown();
        self.last_alerted
            .lock()
            .get(&kind)
            .is_some_and(|at| at.elapsed() < cooldown)
    }

    /// Derive alerts from a window of finished executions.
    fn evaluate(&self, recent: &[QueryExecution], rate_limited: u64) -> Vec<SecurityAlert> {
        let mut alerts = Vec::new();
        let window_secs = self.config.security_window_secs;

        let slow_ms = self.config.slow_query_ms as f64;
        let slow = recent.iter().filter(|e| e.duration_ms > slow_ms).count();
        if slow > self.config.slow_query_burst_threshold {
            let slowest = recent.iter().map(|e| e.duration_ms).fold(0.0_f64, f64::max);
            alerts.push(
                SecurityAlert::new(
                    SecurityEventKind::SlowQueryDetected,
                    AlertSeverity::Medium,
                    format!("{slow} queries exceeded {}ms in the last {window_secs}s", self.config.slow_query_ms),
                )
                .with_detail("slow_queries", slow)
                .with_detail("threshold", self.config.slow_query_burst_threshold)
                .with_detail("slowest_ms", slowest),
            );
        }

        let failures = recent.iter().filter(|e| e.status.is_failure()).count();
        if recent.len() >= self.config.min_error_sample.max(1) {
            let rate = failures as f64 / recent.len() as f64;
            if rate > self.config.error_rate_threshold {
                alerts.push(
                    SecurityAlert::new(
                        SecurityEventKind::HighErrorRate,
                        AlertSeverity::High,
                        format!("{:.1}% of {} queries failed", rate * 100.0, recent.len()),
                    )
                    .with_detail("failures", failures)
                    .with_detail("executions", recent.len())
                    .with_detail("error_rate", rate)
                    .with_detail("threshold", self.config.error_rate_threshold),
                );
            }
        }

        let connection_failures = recent
            .iter()
            .filter(|e| e.error_kind == Some(FailureKind::Connection))
            .count();
        if connection_failures > 0 && connection_failures >= self.config.connection_failure_threshold {
            alerts.push(
                SecurityAlert::new(
                    SecurityEventKind::ConnectionFailure,
                    AlertSeverity::High,
                    format!("{connection_failures} connection failures in the last {window_secs}s"),
                )
                .with_detail("connection_failures", connection_failures)
                .with_detail("threshold", self.config.connection_failure_threshold),
            );
        }

        if let Some(patterns) = &self.suspicious {
            let flagged: Vec<&str> = recent
                .iter()
                .filter_map(|e| e.statement.as_deref())
                .filter(|s| patterns.is_match(s))
                .collect();
            if !flagged.is_empty() {
                let quoted: Vec<serde_json::Value> = flagged
                    .iter()
                    .take(MAX_QUOTED_STATEMENTS)
                    .map(|s| serde_json::Value::from(*s))
                    .collect();
                alerts.push(
                    SecurityAlert::new(
                        SecurityEventKind::SuspiciousQuery,
                        AlertSeverity::Critical,
                        format!("{} statement(s) match injection patterns", flagged.len()),
                    )
                    .with_detail("count", flagged.len())
                    .with_detail("statements", quoted),
                );
            }
        }

        if rate_limited > 0 {
            alerts.push(
                SecurityAlert::new(
                    SecurityEventKind::RateLimitExceeded,
                    AlertSeverity::Medium,
                    format!(
                        "{rate_limited} queries started above {} per second",
                        self.config.max_queries_per_second
                    ),
                )
                .with_detail("over_limit", rate_limited)
                .with_detail("max_per_second", self.config.max_queries_per_second),
            );
        }

        alerts
    }

    /// Try to re-establish the backend connection.
    ///
    /// Makes up to `max_recovery_attempts` reconnects spaced by
    /// `recovery_delay` and alerts on the final outcome. Returns `false`
    /// immediately if a recovery is already running.
    pub async fn attempt_recovery(&self) -> bool {
        if self.recovering.swap(true, Ordering::AcqRel) {
            tracing::debug!("recovery already in progress");
            return false;
        }
        let _recovering = RecoveryFlag(&self.recovering);

        let max_attempts = self.config.max_recovery_attempts.max(1);
        let delay = self.config.recovery_delay();
        let mut last_error = String::new();
        let mut recovered_on = None;

        for attempt in 1..=max_attempts {
            self.counters.recovery_attempts.fetch_add(1, Ordering::Relaxed);
            tracing::info!(attempt, max_attempts, "attempting connection recovery");

            match self.probe.reconnect().await {
                Ok(()) => {
                    recovered_on = Some(attempt);
                    break;
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "recovery attempt failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let alert = match recovered_on {
            Some(attempt) => {
                self.counters.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(attempts = attempt, "connection recovered");
                SecurityAlert::new(
                    SecurityEventKind::ConnectionFailure,
                    AlertSeverity::Low,
                    format!("connection recovered after {attempt} attempt(s)"),
                )
                .with_detail("recovered", true)
                .with_detail("attempts", attempt)
            }
            None => {
                self.counters.recoveries_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(attempts = max_attempts, error = %last_error, "connection recovery failed");
                SecurityAlert::new(
                    SecurityEventKind::ConnectionFailure,
                    AlertSeverity::Critical,
                    format!("connection recovery failed after {max_attempts} attempt(s)"),
                )
                .with_detail("recovered", false)
                .with_detail("attempts", max_attempts)
                .with_detail("last_error", last_error)
            }
        };
        self.alerts.dispatch(alert).await;
        recovered_on.is_some()
    }

    pub fn subscribe(&self, callback: Arc<dyn AlertCallback>) {
        self.alerts.subscribe(callback);
    }

    /// Health results, oldest first.
    pub fn health_history(&self) -> Vec<HealthCheckResult> {
        self.health_history.lock().iter().cloned().collect()
    }

    pub fn last_health(&self) -> Option<HealthCheckResult> {
        self.health_history.lock().back().cloned()
    }

    /// Alerts from every source, oldest first.
    pub fn alert_history(&self) -> Vec<SecurityAlert> {
        self.alerts.history()
    }

    pub fn status(&self) -> MonitoringStatus {
        MonitoringStatus {
            running: self.is_running(),
            connected: self.probe.is_connected(),
            last_health: self.last_health(),
            recent_alerts: self.alerts.recent(STATUS_RECENT_ALERTS),
            health_checks: self.counters.health_checks.load(Ordering::Relaxed),
            security_checks: self.counters.security_checks.load(Ordering::Relaxed),
            alerts_dispatched: self.alerts.dispatched_count(),
            failed_deliveries: self.alerts.failed_deliveries(),
            suppressed_alerts: self.counters.suppressed_alerts.load(Ordering::Relaxed),
            recovery_attempts: self.counters.recovery_attempts.load(Ordering::Relaxed),
            recoveries_succeeded: self.counters.recoveries_succeeded.load(Ordering::Relaxed),
            recoveries_failed: self.counters.recoveries_failed.load(Ordering::Relaxed),
            subscribers: self.alerts.subscriber_count(),
            tracked_queries: self.tracker.history().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{DbError, DbResult};
    use crate::domain::models::{ConnectionMode, ExecutionStatus, OperationKind};
    use crate::domain::ports::FnAlertCallback;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FakeProbe {
        latency: Mutex<Option<Duration>>,
        connected: AtomicBool,
        reconnect_failures: AtomicU32,
        reconnects: AtomicU32,
    }

    impl FakeProbe {
        fn new(latency: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                latency: Mutex::new(latency),
                connected: AtomicBool::new(latency.is_some()),
                reconnect_failures: AtomicU32::new(0),
                reconnects: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl HealthProbe for FakeProbe {
        async fn probe(&self) -> DbResult<Duration> {
            let latency = *self.latency.lock();
            latency.ok_or_else(|| DbError::ConnectionCreateFailed {
                mode: ConnectionMode::Direct,
                reason: "backend down".into(),
            })
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn reconnect(&self) -> DbResult<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.reconnect_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.reconnect_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DbError::ConnectionCreateFailed {
                    mode: ConnectionMode::Direct,
                    reason: "still down".into(),
                });
            }
            *self.latency.lock() = Some(Duration::from_millis(5));
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            warning_response_ms: 100,
            critical_response_ms: 500,
            slow_query_ms: 100,
            max_queries_per_second: 0,
            recovery_delay_ms: 1_000,
            ..MonitorConfig::default()
        }
    }

    fn monitor(probe: Arc<FakeProbe>, config: MonitorConfig) -> Arc<Monitor> {
        let tracker = Arc::new(QueryTracker::new(config.history_capacity, config.max_queries_per_second));
        let alerts = Arc::new(AlertDispatcher::new(config.alert_history_capacity));
        Arc::new(Monitor::new(config, probe, tracker, alerts))
    }

    fn finished(duration_ms: f64, status: ExecutionStatus) -> QueryExecution {
        let mut e = QueryExecution::start(OperationKind::Select, "trips", ConnectionMode::Transaction);
        e.duration_ms = duration_ms;
        e.status = status;
        e.finished_at = Some(chrono::Utc::now());
        e
    }

    fn counting_callback(name: &str) -> (Arc<dyn AlertCallback>, Arc<Mutex<Vec<SecurityEventKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = FnAlertCallback::new(name, move |alert: &SecurityAlert| {
            sink.lock().push(alert.kind);
            Ok(())
        });
        (Arc::new(callback), seen)
    }

    #[tokio::test]
    async fn test_fast_probe_is_healthy() {
        let monitor = monitor(FakeProbe::new(Some(Duration::from_millis(50))), config());
        let result = monitor.manual_health_check().await;

        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.details["connected"], true);
        assert_eq!(monitor.health_history().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_and_failed_probes_are_classified() {
        let probe = FakeProbe::new(Some(Duration::from_millis(250)));
        let monitor = monitor(Arc::clone(&probe), config());
        assert_eq!(monitor.manual_health_check().await.status, HealthStatus::Warning);

        *probe.latency.lock() = None;
        let result = monitor.manual_health_check().await;
        assert_eq!(result.status, HealthStatus::Critical);
        assert!(result.message.starts_with("probe failed"));
    }

    #[tokio::test]
    async fn test_slow_query_burst_reaches_every_subscriber() {
        let monitor = monitor(FakeProbe::new(Some(Duration::from_millis(5))), config());
        let (first, first_seen) = counting_callback("first");
        let (second, second_seen) = counting_callback("second");
        monitor.subscribe(first);
        monitor.subscribe(second);

        for i in 0..15 {
            let duration = if i < 12 { 250.0 } else { 10.0 };
            monitor.tracker().record(finished(duration, ExecutionStatus::Success));
        }

        let raised = monitor.manual_security_check().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, SecurityEventKind::SlowQueryDetected);
        assert_eq!(raised[0].details["slow_queries"], 12);
        assert_eq!(*first_seen.lock(), vec![SecurityEventKind::SlowQueryDetected]);
        assert_eq!(*second_seen.lock(), vec![SecurityEventKind::SlowQueryDetected]);
    }

    #[tokio::test]
    async fn test_error_rate_needs_minimum_sample() {
        let monitor = monitor(FakeProbe::new(Some(Duration::from_millis(5))), config());
        for _ in 0..5 {
            monitor.tracker().record(finished(1.0, ExecutionStatus::Error));
        }
        assert!(monitor.manual_security_check().await.is_empty());

        for _ in 0..5 {
            monitor.tracker().record(finished(1.0, ExecutionStatus::Success));
        }
        let raised = monitor.manual_security_check().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, SecurityEventKind::HighErrorRate);
    }

    #[tokio::test]
    async fn test_connection_failures_and_suspicious_statements() {
        let monitor = monitor(FakeProbe::new(Some(Duration::from_millis(5))), config());
        for _ in 0..3 {
            let mut e = finished(1.0, ExecutionStatus::Error);
            e.error_kind = Some(FailureKind::Connection);
            monitor.tracker().record(e);
        }
        let mut raw = finished(1.0, ExecutionStatus::Success);
        raw.statement = Some("SELECT * FROM users WHERE name = '' OR 1=1".into());
        monitor.tracker().record(raw);
        let mut benign = finished(1.0, ExecutionStatus::Success);
        benign.statement = Some("VACUUM".into());
        monitor.tracker().record(benign);

        let kinds: Vec<SecurityEventKind> = monitor
            .manual_security_check()
            .await
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert!(kinds.contains(&SecurityEventKind::ConnectionFailure));
        assert!(kinds.contains(&SecurityEventKind::SuspiciousQuery));
        assert!(!kinds.contains(&SecurityEventKind::HighErrorRate));
    }

    #[tokio::test]
    async fn test_periodic_check_respects_cooldown() {
        let monitor = monitor(FakeProbe::new(Some(Duration::from_millis(5))), config());
        for _ in 0..11 {
            monitor.tracker().record(finished(500.0, ExecutionStatus::Success));
        }

        assert_eq!(monitor.run_security_check(true).await.len(), 1);
        assert!(monitor.run_security_check(true).await.is_empty());
        assert_eq!(monitor.manual_security_check().await.len(), 1);
        assert_eq!(monitor.status().suppressed_alerts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_succeeds_within_attempts() {
        let probe = FakeProbe::new(None);
        probe.reconnect_failures.store(2, Ordering::SeqCst);
        let monitor = monitor(Arc::clone(&probe), config());

        assert!(monitor.attempt_recovery().await);
        assert_eq!(probe.reconnects.load(Ordering::SeqCst), 3);

        let alerts = monitor.alert_history();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Low);
        assert_eq!(alerts[0].details["attempts"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_failure_is_critical() {
        let probe = FakeProbe::new(None);
        probe.reconnect_failures.store(10, Ordering::SeqCst);
        let monitor = monitor(Arc::clone(&probe), config());

        assert!(!monitor.attempt_recovery().await);
        let status = monitor.status();
        assert_eq!(status.recovery_attempts, 3);
        assert_eq!(status.recoveries_failed, 1);
        assert_eq!(monitor.alert_history()[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_loop_recovers_disconnected_backend() {
        let probe = FakeProbe::new(None);
        let config = MonitorConfig {
            health_check_interval_secs: 1,
            security_check_interval_secs: 3600,
            ..config()
        };
        let monitor = monitor(Arc::clone(&probe), config);

        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        monitor.stop().await;

        assert!(!monitor.is_running());
        assert!(probe.is_connected());
        assert_eq!(monitor.health_history()[0].status, HealthStatus::Critical);
        assert_eq!(monitor.status().recoveries_succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_running_recovery() {
        let probe = FakeProbe::new(None);
        probe.reconnect_failures.store(10, Ordering::SeqCst);
        let config = MonitorConfig {
            health_check_interval_secs: 1,
            security_check_interval_secs: 3600,
            recovery_delay_ms: 5_000,
            max_recovery_attempts: 3,
            ..config()
        };
        let monitor = monitor(Arc::clone(&probe), config);

        monitor.start();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(probe.reconnects.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        monitor.stop().await;

        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!monitor.is_running());
        assert!(!monitor.recovering.load(Ordering::SeqCst));
        assert_eq!(monitor.status().recoveries_failed, 0);
    }
}
