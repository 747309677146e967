//! Monitoring through the service facade.

mod common;

use common::{fast_config, recording_callback, service_over};
use dbweave::adapters::MemoryBackend;
use dbweave::{AlertSeverity, HealthStatus, SecurityEventKind};

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_is_critical_until_recovered() {
    let backend = MemoryBackend::new();
    let service = service_over(&backend, fast_config());
    service.pools().warm_up().await.unwrap();

    backend.set_down(true);
    let result = service.health_check().await;
    assert_eq!(result.status, HealthStatus::Critical);

    backend.set_down(false);
    assert!(service.monitor().attempt_recovery().await);

    let status = service.get_monitoring_status();
    assert_eq!(status.recoveries_succeeded, 1);
    assert!(status.connected);
    let recovered = service
        .alert_history()
        .into_iter()
        .find(|a| a.kind == SecurityEventKind::ConnectionFailure)
        .unwrap();
    assert_eq!(recovered.severity, AlertSeverity::Low);

    assert_eq!(service.health_check().await.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_injection_shaped_statement_raises_critical_alert() {
    let backend = MemoryBackend::new();
    let service = service_over(&backend, fast_config());
    let (callback, seen) = recording_callback("security");
    service.subscribe_alerts(callback);

    service
        .execute_raw("SELECT * FROM users WHERE name = '' OR 1=1", None)
        .await
        .unwrap();
    let alerts = service.security_check().await;

    let suspicious = alerts
        .iter()
        .find(|a| a.kind == SecurityEventKind::SuspiciousQuery)
        .unwrap();
    assert_eq!(suspicious.severity, AlertSeverity::Critical);
    assert_eq!(seen.lock().len(), alerts.len());
}

#[tokio::test]
async fn test_quiet_traffic_raises_nothing() {
    let backend = MemoryBackend::new().with_table("trips");
    let service = service_over(&backend, fast_config());

    for _ in 0..5 {
        service.count("trips", vec![], None).await.unwrap();
    }
    assert!(service.security_check().await.is_empty());
    assert_eq!(service.get_monitoring_status().security_checks, 1);
}
