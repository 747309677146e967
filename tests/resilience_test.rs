//! Retry, circuit breaker and pool behavior under concurrent load.

mod common;

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, recording_callback, service_over};
use dbweave::adapters::MemoryBackend;
use dbweave::domain::models::ExecutionStatus;
use dbweave::services::CircuitState;
use dbweave::domain::ports::{AlertCallback, FnAlertCallback};
use dbweave::{
    Config, ConnectionMode, DbError, ErrorClass, SecurityAlert, SecurityEventKind, SelectQuery,
    StorageError,
};

fn uncached(mut config: Config) -> Config {
    config.cache.enabled = false;
    config
}

#[tokio::test]
async fn test_success_on_attempt_k_hides_earlier_failures() {
    for k in 1..=5u32 {
        let backend = MemoryBackend::new().with_table("trips");
        let mut config = uncached(fast_config());
        config.retry.max_attempts = 5;
        config.circuit_breaker.failure_threshold = 10;
        let service = service_over(&backend, config);

        backend.fail_next_executes(k - 1);
        let result = service.select(SelectQuery::new("trips"), None).await;

        assert!(result.is_ok(), "attempt {k} should succeed");
        assert_eq!(backend.execute_count(), u64::from(k));
        let history = service.tracker().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Success);
    }
}

#[tokio::test]
async fn test_exhausted_retries_surface_attempt_count() {
    let backend = MemoryBackend::new().with_table("trips");
    let mut config = uncached(fast_config());
    config.retry.max_attempts = 3;
    config.circuit_breaker.failure_threshold = 10;
    let service = service_over(&backend, config);

    backend.fail_next_executes(5);
    let err = service.select(SelectQuery::new("trips"), None).await.unwrap_err();

    assert!(matches!(err, DbError::TransientStorage { attempts: 3, .. }));
    assert_eq!(backend.execute_count(), 3);
}

#[tokio::test]
async fn test_permanent_errors_are_not_retried() {
    let backend = MemoryBackend::new().with_table("trips");
    let service = service_over(&backend, uncached(fast_config()));

    backend.fail_next_executes_with(1, StorageError::InvalidQuery("no such column: nme".into()));
    let err = service.select(SelectQuery::new("trips"), None).await.unwrap_err();

    assert!(matches!(err, DbError::PermanentStorage { .. }));
    assert_eq!(backend.execute_count(), 1);
}

#[tokio::test]
async fn test_validation_errors_do_not_trip_the_circuit() {
    let backend = MemoryBackend::new().with_table("trips");
    let mut config = uncached(fast_config());
    config.circuit_breaker.failure_threshold = 1;
    let service = service_over(&backend, config);

    for _ in 0..3 {
        let err = service.delete("trips", vec![], None).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }
    assert!(service.select(SelectQuery::new("trips"), None).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens_with_fresh_cooldown() {
    let backend = MemoryBackend::new().with_table("trips");
    let mut config = uncached(fast_config());
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.success_threshold = 2;
    config.circuit_breaker.cooldown_ms = 1_000;
    let service = service_over(&backend, config);
    let select = || service.select(SelectQuery::new("trips"), None);
    let state = || service.get_connection_stats().circuits[0].state;

    backend.fail_next_executes(2);
    let _ = select().await;
    let _ = select().await;
    assert_eq!(state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    backend.fail_next_executes(1);
    assert!(select().await.is_err());
    assert_eq!(state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(select().await, Err(DbError::CircuitOpen { .. })));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(select().await.is_ok());
    assert_eq!(state(), CircuitState::HalfOpen);
    assert!(select().await.is_ok());
    assert_eq!(state(), CircuitState::Closed);
    assert_eq!(service.get_connection_stats().circuits[0].open_count, 2);
}

#[tokio::test]
async fn test_constraint_violations_leave_the_circuit_closed() {
    let backend = MemoryBackend::new();
    backend.seed("trips", vec![common::row(serde_json::json!({"id": 1, "name": "Paris"}))]);
    let mut config = uncached(fast_config());
    config.circuit_breaker.failure_threshold = 3;
    let service = service_over(&backend, config);

    for _ in 0..5 {
        let err = service
            .insert("trips", vec![common::row(serde_json::json!({"id": 1, "name": "Rome"}))], None)
            .await
            .unwrap_err();
        assert_eq!(err.classification(), ErrorClass::FixRequest);
    }

    let rows = service.select(SelectQuery::new("trips"), None).await.unwrap();
    assert_eq!(rows.len(), 1);
    let stats = service.get_connection_stats();
    assert!(stats.circuits.iter().all(|c| c.state == CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_slow_alert_subscriber_does_not_hold_up_queries() {
    let backend = MemoryBackend::new().with_table("trips");
    let mut config = uncached(fast_config());
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 1;
    let service = service_over(&backend, config);
    service.subscribe_alerts(Arc::new(FnAlertCallback::new("fast", |_: &SecurityAlert| Ok(()))));
    service.subscribe_alerts(Arc::new(StalledPager));

    backend.fail_next_executes(1);
    let started = tokio::time::Instant::now();
    let err = service.select(SelectQuery::new("trips"), None).await.unwrap_err();

    assert!(matches!(err, DbError::TransientStorage { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(service.get_monitoring_status().recent_alerts.len(), 1);
}

struct StalledPager;

#[async_trait::async_trait]
impl AlertCallback for StalledPager {
    async fn on_alert(&self, _alert: &SecurityAlert) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opening_raises_one_alert() {
    let backend = MemoryBackend::new().with_table("trips");
    let mut config = uncached(fast_config());
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    let service = service_over(&backend, config);
    let (callback, seen) = recording_callback("pager");
    service.subscribe_alerts(callback);

    backend.fail_next_executes(2);
    for _ in 0..4 {
        let _ = service.select(SelectQuery::new("trips"), None).await;
    }
    // Subscribers are notified off the request path.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, SecurityEventKind::HighErrorRate);
}

#[tokio::test]
async fn test_concurrent_leases_are_exclusive_and_bounded() {
    let backend = MemoryBackend::new();
    let mut config = fast_config();
    config.pool.transaction.min_size = 0;
    config.pool.transaction.max_size = 3;
    let service = Arc::new(service_over(&backend, config));
    let held: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut tasks = Vec::new();
    for _ in 0..24 {
        let service = Arc::clone(&service);
        let held = Arc::clone(&held);
        tasks.push(tokio::spawn(async move {
            let lease = service
                .pools()
                .acquire(ConnectionMode::Transaction, Some(Duration::from_secs(5)))
                .await
                .unwrap();
            assert!(held.lock().insert(lease.id()), "connection leased twice");

            let stats = service.pools().stats();
            let pool = stats.mode(ConnectionMode::Transaction).unwrap();
            assert!(pool.total <= 3);
            assert!(pool.in_use <= 3);

            tokio::time::sleep(Duration::from_millis(5)).await;
            held.lock().remove(&lease.id());
            lease.release(true);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = service.pools().stats();
    let pool = stats.mode(ConnectionMode::Transaction).unwrap();
    assert_eq!(pool.acquisitions, 24);
    assert_eq!(pool.in_use, 0);
    assert!(pool.created <= 3);
    assert!(backend.peak_open_connections() <= 3);
}

#[tokio::test]
async fn test_acquire_times_out_with_pool_exhausted() {
    let backend = MemoryBackend::new();
    let mut config = fast_config();
    config.pool.direct.max_size = 1;
    let service = service_over(&backend, config);

    let held = service.pools().acquire(ConnectionMode::Direct, None).await.unwrap();
    let err = service
        .pools()
        .acquire(ConnectionMode::Direct, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::PoolExhausted { mode: ConnectionMode::Direct, .. }));
    held.release(true);
    assert!(service.pools().acquire(ConnectionMode::Direct, None).await.is_ok());
}
