//! Bounded record of query executions.
//!
//! The tracker is the only data source for query-based monitoring: the
//! security loop reads its recent history and the metrics snapshot is
//! computed from it.

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::errors::DbError;
use crate::domain::models::{ConnectionMode, ExecutionStatus, OperationKind, QueryExecution};

/// Per-operation aggregate inside [`QueryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub count: usize,
    pub errors: usize,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// Snapshot of tracked executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub total_started: u64,
    pub tracked: usize,
    pub in_flight: usize,
    pub success: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub cancelled: usize,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
    pub slow_queries: usize,
    pub slow_query_threshold_ms: u64,
    pub rate_limited: u64,
    pub by_operation: BTreeMap<String, OperationMetrics>,
}

/// Records the start and finish of every operation.
pub struct QueryTracker {
    history: Mutex<VecDeque<QueryExecution>>,
    in_flight: Mutex<HashMap<Uuid, (QueryExecution, Instant)>>,
    capacity: usize,
    limiter: Option<DefaultDirectRateLimiter>,
    started: AtomicU64,
    rate_limited_total: AtomicU64,
    rate_limited_pending: AtomicU64,
}

impl QueryTracker {
    /// `max_per_second == 0` disables rate observation.
    pub fn new(capacity: usize, max_per_second: u32) -> Self {
        let limiter = NonZeroU32::new(max_per_second).map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            in_flight: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            limiter,
            started: AtomicU64::new(0),
            rate_limited_total: AtomicU64::new(0),
            rate_limited_pending: AtomicU64::new(0),
        }
    }

    /// Register a starting operation.
    pub fn begin(
        &self,
        operation: OperationKind,
        table: &str,
        mode: ConnectionMode,
        statement: Option<&str>,
    ) -> TrackedQuery<'_> {
        let mut execution = QueryExecution::start(operation, table, mode);
        execution.statement = statement.map(str::to_string);
        let id = execution.id;

        self.started.fetch_add(1, Ordering::Relaxed);
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
                self.rate_limited_pending.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.in_flight.lock().insert(id, (execution, Instant::now()));

        TrackedQuery {
            tracker: self,
            id,
            done: false,
        }
    }

    fn complete(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        row_count: usize,
        error: Option<&DbError>,
    ) -> Option<QueryExecution> {
        let (mut execution, started) = self.in_flight.lock().remove(&id)?;
        let elapsed = started.elapsed();
        execution.status = status;
        execution.duration_ms = elapsed.as_secs_f64() * 1000.0;
        execution.finished_at = Some(execution.started_at + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero()));
        execution.row_count = row_count;
        if let Some(err) = error {
            execution.error = Some(err.to_string());
            execution.error_kind = Some(err.failure_kind());
        }
        self.record(execution.clone());
        Some(execution)
    }

    /// Append a finished execution, evicting the oldest past capacity.
    pub fn record(&self, execution: QueryExecution) {
        let mut history = self.history.lock();
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(execution);
    }

    /// Finished executions, oldest first.
    pub fn history(&self) -> Vec<QueryExecution> {
        self.history.lock().iter().cloned().collect()
    }

    /// Executions that finished within `window` of now.
    pub fn recent(&self, window: Duration) -> Vec<QueryExecution> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w));
        self.history
            .lock()
            .iter()
            .filter(|e| match (e.finished_at, cutoff) {
                (Some(t), Some(cutoff)) => t >= cutoff,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect()
    }

    pub fn in_flight(&self) -> Vec<QueryExecution> {
        self.in_flight.lock().values().map(|(e, _)| e.clone()).collect()
    }

    /// Query starts over the observation rate since the last call.
    pub fn take_rate_limited(&self) -> u64 {
        self.rate_limited_pending.swap(0, Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

    pub fn metrics(&self, slow_threshold: Duration) -> QueryMetrics {
        let history = self.history();
        let slow_ms = slow_threshold.as_secs_f64() * 1000.0;

        let mut durations: Vec<f64> = history.iter().map(|e| e.duration_ms).collect();
        durations.sort_by(f64::total_cmp);
        let total: f64 = durations.iter().sum();

        let mut by_operation: BTreeMap<String, OperationMetrics> = BTreeMap::new();
        for e in &history {
            let m = by_operation.entry(e.operation.as_str().to_string()).or_default();
            m.avg_ms = (m.avg_ms * m.count as f64 + e.duration_ms) / (m.count + 1) as f64;
            m.count += 1;
            m.max_ms = m.max_ms.max(e.duration_ms);
            if e.status.is_failure() {
                m.errors += 1;
            }
        }

        let count_status = |s: ExecutionStatus| history.iter().filter(|e| e.status == s).count();

        QueryMetrics {
            total_started: self.started.load(Ordering::Relaxed),
            tracked: history.len(),
            in_flight: self.in_flight.lock().len(),
            success: count_status(ExecutionStatus::Success),
            errors: count_status(ExecutionStatus::Error),
            timeouts: count_status(ExecutionStatus::Timeout),
            cancelled: count_status(ExecutionStatus::Cancelled),
            avg_ms: if durations.is_empty() {
                0.0
            } else {
                total / durations.len() as f64
            },
            p95_ms: percentile(&durations, 0.95),
            max_ms: durations.last().copied().unwrap_or(0.0),
            slow_queries: history.iter().filter(|e| e.duration_ms > slow_ms).count(),
            slow_query_threshold_ms: slow_threshold.as_millis() as u64,
            rate_limited: self.rate_limited_total.load(Ordering::Relaxed),
            by_operation,
        }
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// An operation in flight. Dropping it unfinished records it as cancelled.
pub struct TrackedQuery<'a> {
    tracker: &'a QueryTracker,
    id: Uuid,
    done: bool,
}

impl TrackedQuery<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn success(mut self, row_count: usize) -> Option<QueryExecution> {
        self.done = true;
        self.tracker
            .complete(self.id, ExecutionStatus::Success, row_count, None)
    }

    pub fn failure(mut self, error: &DbError) -> Option<QueryExecution> {
        self.done = true;
        let status = match error {
            DbError::TimedOut { .. } => ExecutionStatus::Timeout,
            _ => ExecutionStatus::Error,
        };
        self.tracker.complete(self.id, status, 0, Some(error))
    }
}

impl Drop for TrackedQuery<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.tracker
                .complete(self.id, ExecutionStatus::Cancelled, 0, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::StorageError;

    #[test]
    fn test_history_is_bounded_fifo() {
        let tracker = QueryTracker::new(3, 0);
        for table in ["a", "b", "c", "d"] {
            tracker
                .begin(OperationKind::Select, table, ConnectionMode::Transaction, None)
                .success(1);
        }
        let tables: Vec<String> = tracker.history().into_iter().map(|e| e.table).collect();
        assert_eq!(tables, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_outcomes_are_classified() {
        let tracker = QueryTracker::new(10, 0);
        tracker
            .begin(OperationKind::Select, "t", ConnectionMode::Transaction, None)
            .failure(&DbError::TimedOut {
                operation: "select".into(),
                after_ms: 10,
            });
        let failed = tracker
            .begin(OperationKind::Insert, "t", ConnectionMode::Session, None)
            .failure(&DbError::storage(
                OperationKind::Insert,
                "t",
                StorageError::Connection("refused".into()),
            ))
            .unwrap();
        drop(tracker.begin(OperationKind::Count, "t", ConnectionMode::Transaction, None));

        assert_eq!(failed.status, ExecutionStatus::Error);
        assert_eq!(failed.error_kind, Some(crate::domain::errors::FailureKind::Connection));
        assert!(failed.duration_ms >= 0.0);

        let metrics = tracker.metrics(Duration::from_secs(1));
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.cancelled, 1);
        assert_eq!(metrics.in_flight, 0);
        assert_eq!(metrics.by_operation["insert"].errors, 1);
    }

    #[test]
    fn test_rate_observation_counts_overflow() {
        let tracker = QueryTracker::new(100, 2);
        for _ in 0..5 {
            tracker
                .begin(OperationKind::Select, "t", ConnectionMode::Transaction, None)
                .success(0);
        }
        assert_eq!(tracker.take_rate_limited(), 3);
        assert_eq!(tracker.take_rate_limited(), 0);
        assert_eq!(tracker.metrics(Duration::from_secs(1)).rate_limited, 3);
    }

    #[test]
    fn test_percentile() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.95), 19.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
    }
}
