//! End-to-end scenarios over the in-memory backend.

mod common;

use serde_json::json;
use std::time::Duration;

use common::{fast_config, recording_callback, row, service_over};
use dbweave::adapters::MemoryBackend;
use dbweave::domain::models::{ExecutionStatus, QueryExecution};
use dbweave::services::CircuitState;
use dbweave::{ConnectionMode, DbError, Filter, HealthStatus, OperationKind, SecurityEventKind, SelectQuery};

#[tokio::test]
async fn test_insert_is_visible_to_previously_cached_select() {
    let backend = MemoryBackend::new().with_table("trips");
    let service = service_over(&backend, fast_config());
    let by_id = || SelectQuery::new("trips").filter(Filter::eq("id", 1));

    let before = service.select(by_id(), None).await.unwrap();
    assert!(before.is_empty());

    let inserted = service
        .insert("trips", vec![row(json!({"name": "Paris"}))], None)
        .await
        .unwrap();
    assert_eq!(inserted[0]["id"], json!(1));

    let after = service.select(by_id(), None).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["name"], json!("Paris"));

    let cache = service.get_connection_stats().cache;
    assert_eq!(cache.misses, 2);
    assert!(cache.invalidations >= 1);
}

#[tokio::test]
async fn test_third_select_waits_for_a_release_instead_of_failing() {
    let backend = MemoryBackend::new().with_table("trips");
    backend.set_latency(Duration::from_millis(200));
    let mut config = fast_config();
    config.pool.transaction.min_size = 0;
    config.pool.transaction.max_size = 2;
    config.pool.acquire_timeout_ms = 1_000;
    let service = service_over(&backend, config);

    let select = |n: i64| service.select(SelectQuery::new("trips").filter(Filter::gte("id", n)), None);
    let (a, b, c) = tokio::join!(select(1), select(2), select(3));

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(c.is_ok());

    let stats = service.get_connection_stats();
    let pool = stats.pools.mode(ConnectionMode::Transaction).unwrap();
    assert_eq!(pool.exhausted, 0);
    assert_eq!(pool.acquisitions, 3);
    assert!(pool.created <= 2);
    assert!(backend.peak_open_connections() <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_then_recovers_after_cooldown() {
    let backend = MemoryBackend::new().with_table("trips");
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.success_threshold = 1;
    config.circuit_breaker.cooldown_ms = 2_000;
    config.cache.enabled = false;
    let service = service_over(&backend, config);
    let select = || service.select(SelectQuery::new("trips"), None);

    backend.fail_next_executes(3);
    for _ in 0..3 {
        let err = select().await.unwrap_err();
        assert!(matches!(err, DbError::TransientStorage { .. }));
    }

    let calls_before = backend.execute_count();
    let err = select().await.unwrap_err();
    assert!(matches!(err, DbError::CircuitOpen { ref circuit, .. } if circuit == "primary"));
    assert_eq!(backend.execute_count(), calls_before);

    tokio::time::sleep(Duration::from_millis(2_100)).await;

    assert!(select().await.is_ok());
    let circuits = service.get_connection_stats().circuits;
    assert_eq!(circuits[0].name, "primary");
    assert_eq!(circuits[0].state, CircuitState::Closed);

    assert!(select().await.is_ok());
}

#[tokio::test]
async fn test_fast_probe_reports_healthy() {
    let backend = MemoryBackend::new();
    backend.set_probe_latency(Duration::from_millis(50));
    let mut config = fast_config();
    config.monitor.warning_response_ms = 100;
    config.monitor.critical_response_ms = 500;
    let service = service_over(&backend, config);

    let result = service.health_check().await;

    assert_eq!(result.status, HealthStatus::Healthy);
    assert!(result.response_time_ms >= 50.0);
    assert_eq!(service.health_history().len(), 1);
}

#[tokio::test]
async fn test_slow_query_burst_alerts_every_subscriber() {
    let backend = MemoryBackend::new();
    let service = service_over(&backend, fast_config());
    let (first, first_seen) = recording_callback("pager");
    let (second, second_seen) = recording_callback("dashboard");
    service.subscribe_alerts(first);
    service.subscribe_alerts(second);

    let slow_ms = service.config().monitor.slow_query_ms as f64;
    for i in 0..15 {
        let mut execution = QueryExecution::start(OperationKind::Select, "trips", ConnectionMode::Transaction);
        execution.duration_ms = if i < 12 { slow_ms * 1.5 } else { 5.0 };
        execution.status = ExecutionStatus::Success;
        execution.finished_at = Some(chrono::Utc::now());
        service.tracker().record(execution);
    }

    let alerts = service.security_check().await;

    assert!(alerts.iter().any(|a| a.kind == SecurityEventKind::SlowQueryDetected));
    for seen in [first_seen, second_seen] {
        let seen = seen.lock();
        assert!(seen.iter().any(|a| a.kind == SecurityEventKind::SlowQueryDetected));
    }
    assert_eq!(service.get_query_metrics().slow_queries, 12);
}
