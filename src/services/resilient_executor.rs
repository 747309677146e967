//! Retry and circuit breaking around a single storage call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{DbError, DbResult};
use crate::domain::models::{AlertSeverity, SecurityAlert, SecurityEventKind};
use crate::services::alert_dispatcher::AlertDispatcher;
use crate::services::circuit_breaker::{CircuitBreakerRegistry, CircuitStats, Transition};
use crate::services::retry::RetryPolicy;

/// Runs closures under a retry policy and a named circuit breaker.
///
/// Every attempt asks the circuit for admission first, so a circuit that
/// opens mid-retry stops the remaining attempts. Each attempt is bounded by
/// the attempt timeout and reported to the circuit when it finishes.
pub struct ResilientExecutor {
    retry: RetryPolicy,
    breakers: Arc<CircuitBreakerRegistry>,
    alerts: Arc<AlertDispatcher>,
    attempt_timeout: Duration,
}

impl ResilientExecutor {
    pub fn new(
        retry: RetryPolicy,
        breakers: Arc<CircuitBreakerRegistry>,
        alerts: Arc<AlertDispatcher>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            retry,
            breakers,
            alerts,
            attempt_timeout,
        }
    }

    /// Execute `f` with retries under circuit `circuit`.
    ///
    /// `f` is called once per attempt and must build a fresh future each
    /// time.
    pub async fn execute<F, Fut, T>(&self, circuit: &str, operation: &str, mut f: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.retry
            .execute(operation, || {
                let attempt = f();
                self.run_attempt(circuit, operation, attempt)
            })
            .await
    }

    /// Execute `f` once under circuit `circuit`, without retries.
    pub async fn execute_once<Fut, T>(&self, circuit: &str, operation: &str, f: Fut) -> DbResult<T>
    where
        Fut: Future<Output = DbResult<T>>,
    {
        self.run_attempt(circuit, operation, f).await
    }

    async fn run_attempt<Fut, T>(&self, circuit: &str, operation: &str, attempt: Fut) -> DbResult<T>
    where
        Fut: Future<Output = DbResult<T>>,
    {
        let permit = self.breakers.admit(circuit).inspect_err(|e| {
            tracing::debug!(circuit, operation, error = %e, "call rejected by circuit breaker");
        })?;

        let outcome = match tokio::time::timeout(self.attempt_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(DbError::TimedOut {
                operation: operation.to_string(),
                after_ms: self.attempt_timeout.as_millis() as u64,
            }),
        };

        match &outcome {
            Ok(_) => {
                permit.success();
            }
            Err(err) if err.is_backend_failure() => {
                if permit.failure(err) == Some(Transition::Opened) {
                    self.alert_opened(circuit, operation, err);
                }
            }
            Err(_) => permit.neutral(),
        }

        outcome
    }

    fn alert_opened(&self, circuit: &str, operation: &str, cause: &DbError) {
        let cfg = self.breakers.config();
        let alert = SecurityAlert::new(
            SecurityEventKind::HighErrorRate,
            AlertSeverity::High,
            format!(
                "circuit '{circuit}' opened after {} consecutive failures",
                cfg.failure_threshold
            ),
        )
        .with_detail("circuit", circuit)
        .with_detail("operation", operation)
        .with_detail("cooldown_ms", cfg.cooldown_ms)
        .with_detail("last_error", cause.to_string());
        self.alerts.dispatch_detached(alert);
    }

    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.breakers.stats()
    }

    pub fn reset_circuit(&self, name: &str) {
        self.breakers.reset(name);
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::StorageError;
    use crate::domain::models::{CircuitBreakerConfig, OperationKind, RetryConfig};
    use crate::services::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_attempts: u32, failure_threshold: u32) -> ResilientExecutor {
        let retry = RetryPolicy::new(&RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            max_elapsed_ms: 5_000,
            multiplier: 2.0,
            randomization_factor: 0.0,
        });
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 1,
            cooldown_ms: 60_000,
            enabled: true,
        }));
        ResilientExecutor::new(
            retry,
            breakers,
            Arc::new(AlertDispatcher::new(10)),
            Duration::from_millis(200),
        )
    }

    fn connection_error() -> DbError {
        DbError::storage(
            OperationKind::Select,
            "trips",
            StorageError::Connection("refused".into()),
        )
    }

    #[tokio::test]
    async fn test_open_circuit_skips_operation() {
        let exec = executor(1, 2);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: DbResult<()> = exec
                .execute("primary", "select", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(connection_error())
                })
                .await;
            assert!(result.is_err());
        }

        let result: DbResult<()> = exec
            .execute("primary", "select", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(DbError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(exec.alerts.history().len(), 1);
    }

    #[tokio::test]
    async fn test_circuit_open_mid_retry_stops_attempts() {
        let exec = executor(5, 2);
        let calls = AtomicU32::new(0);

        let result: DbResult<()> = exec
            .execute("primary", "select", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(connection_error())
            })
            .await;

        assert!(matches!(result, Err(DbError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transient() {
        let exec = executor(2, 10);
        let calls = AtomicU32::new(0);

        let result = exec
            .execute("primary", "select", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(n)
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        let stats = exec.circuit_stats();
        assert_eq!(stats[0].state, CircuitState::Closed);
        assert_eq!(stats[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_caller_errors_do_not_trip_circuit() {
        let exec = executor(1, 1);

        for _ in 0..3 {
            let result: DbResult<()> = exec
                .execute("primary", "select", || async {
                    Err(DbError::NotFound {
                        table: "trips".into(),
                        detail: "id = 1".into(),
                    })
                })
                .await;
            assert!(matches!(result, Err(DbError::NotFound { .. })));
        }

        assert_eq!(exec.breakers().state("primary"), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_constraint_violations_do_not_trip_circuit() {
        let exec = executor(1, 2);

        for _ in 0..5 {
            let result: DbResult<()> = exec
                .execute("primary", "insert", || async {
                    Err(DbError::storage(
                        OperationKind::Insert,
                        "trips",
                        StorageError::Constraint("duplicate id 1".into()),
                    ))
                })
                .await;
            assert!(matches!(result, Err(DbError::PermanentStorage { .. })));
        }

        assert_eq!(exec.breakers().state("primary"), Some(CircuitState::Closed));
        let result = exec.execute("primary", "select", || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_does_not_delay_caller() {
        let exec = executor(1, 1);
        exec.alerts.subscribe(Arc::new(SlowSubscriber));

        let started = tokio::time::Instant::now();
        let result: DbResult<()> = exec
            .execute("primary", "select", || async { Err(connection_error()) })
            .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(exec.alerts.history().len(), 1);
    }

    struct SlowSubscriber;

    #[async_trait::async_trait]
    impl crate::domain::ports::AlertCallback for SlowSubscriber {
        async fn on_alert(&self, _alert: &SecurityAlert) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }
}
