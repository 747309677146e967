//! Fan-out of security alerts to registered subscribers.

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{AlertSeverity, SecurityAlert};
use crate::domain::ports::AlertCallback;

/// Delivers alerts to every subscriber and keeps a bounded alert history.
///
/// Shared by the monitor, the pool manager and the circuit breakers so that
/// every source of alerts reaches the same subscribers.
pub struct AlertDispatcher {
    callbacks: RwLock<Vec<Arc<dyn AlertCallback>>>,
    history: Mutex<VecDeque<SecurityAlert>>,
    capacity: usize,
    callback_timeout: Duration,
    dispatched: AtomicU64,
    failed_deliveries: AtomicU64,
}

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

impl AlertDispatcher {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.min(1024))),
            capacity: history_capacity.max(1),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            dispatched: AtomicU64::new(0),
            failed_deliveries: AtomicU64::new(0),
        }
    }

    /// Bound the time a single subscriber may spend on one alert.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Register a subscriber. Subscribers are called in registration order.
    pub fn subscribe(&self, callback: Arc<dyn AlertCallback>) {
        tracing::debug!(callback = callback.name(), "alert subscriber registered");
        self.callbacks.write().push(callback);
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Record an alert and deliver it to every subscriber.
    ///
    /// Returns the number of subscribers that accepted it. Errors, panics and
    /// timeouts in a subscriber are logged and do not stop delivery to the
    /// rest.
    pub async fn dispatch(&self, alert: SecurityAlert) -> usize {
        self.record(&alert);
        self.deliver(&alert).await
    }

    /// Record an alert now and deliver it on a background task.
    ///
    /// Used on request paths, where the caller must not wait on subscribers.
    pub fn dispatch_detached(self: &Arc<Self>, alert: SecurityAlert) {
        self.record(&alert);
        if self.subscriber_count() == 0 {
            return;
        }
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.deliver(&alert).await;
        });
    }

    fn record(&self, alert: &SecurityAlert) {
        match alert.severity {
            AlertSeverity::Low | AlertSeverity::Medium => tracing::warn!(
                kind = alert.kind.as_str(),
                severity = ?alert.severity,
                message = %alert.message,
                "security alert"
            ),
            AlertSeverity::High | AlertSeverity::Critical => tracing::error!(
                kind = alert.kind.as_str(),
                severity = ?alert.severity,
                message = %alert.message,
                "security alert"
            ),
        }

        {
            let mut history = self.history.lock();
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    async fn deliver(&self, alert: &SecurityAlert) -> usize {
        // Snapshot so the lock is not held across subscriber awaits.
        let callbacks: Vec<Arc<dyn AlertCallback>> = self.callbacks.read().clone();

        let mut delivered = 0;
        for callback in callbacks {
            let call = AssertUnwindSafe(callback.on_alert(alert)).catch_unwind();
            match tokio::time::timeout(self.callback_timeout, call).await {
                Ok(Ok(Ok(()))) => delivered += 1,
                Ok(Ok(Err(e))) => {
                    self.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        callback = callback.name(),
                        alert_id = %alert.id,
                        error = %e,
                        "alert callback failed"
                    );
                }
                Ok(Err(_)) => {
                    self.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        callback = callback.name(),
                        alert_id = %alert.id,
                        "alert callback panicked"
                    );
                }
                Err(_) => {
                    self.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        callback = callback.name(),
                        alert_id = %alert.id,
                        timeout_ms = self.callback_timeout.as_millis() as u64,
                        "alert callback timed out"
                    );
                }
            }
        }
        delivered
    }

    /// Alerts in dispatch order, oldest first.
    pub fn history(&self) -> Vec<SecurityAlert> {
        self.history.lock().iter().cloned().collect()
    }

    /// The `n` most recent alerts, newest last.
    pub fn recent(&self, n: usize) -> Vec<SecurityAlert> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn failed_deliveries(&self) -> u64 {
        self.failed_deliveries.load(Ordering::Relaxed)
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SecurityEventKind;
    use crate::domain::ports::FnAlertCallback;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Panicking;

    #[async_trait]
    impl AlertCallback for Panicking {
        async fn on_alert(&self, _alert: &SecurityAlert) -> anyhow::Result<()> {
            panic!("subscriber bug");
        }
    }

    fn alert() -> SecurityAlert {
        SecurityAlert::new(
            SecurityEventKind::HighErrorRate,
            AlertSeverity::High,
            "error rate 40%",
        )
    }

    #[tokio::test]
    async fn test_failing_callbacks_are_isolated() {
        let dispatcher = AlertDispatcher::new(10);
        let seen = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(Arc::new(FnAlertCallback::new("failing", |_: &SecurityAlert| {
            anyhow::bail!("webhook down")
        })));
        dispatcher.subscribe(Arc::new(Panicking));
        let counter = seen.clone();
        dispatcher.subscribe(Arc::new(FnAlertCallback::new("counting", move |_: &SecurityAlert| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        let delivered = dispatcher.dispatch(alert()).await;

        assert_eq!(delivered, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.failed_deliveries(), 2);
        assert_eq!(dispatcher.history().len(), 1);
    }

    struct Stalling;

    #[async_trait]
    impl AlertCallback for Stalling {
        async fn on_alert(&self, _alert: &SecurityAlert) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_callback_is_cut_off() {
        let dispatcher = AlertDispatcher::new(10).with_callback_timeout(Duration::from_millis(100));
        let seen = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(Arc::new(Stalling));
        let counter = seen.clone();
        dispatcher.subscribe(Arc::new(FnAlertCallback::new("counting", move |_: &SecurityAlert| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        let started = tokio::time::Instant::now();
        let delivered = dispatcher.dispatch(alert()).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(delivered, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.failed_deliveries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_dispatch_returns_before_delivery() {
        let dispatcher = Arc::new(AlertDispatcher::new(10));
        let seen = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(Arc::new(Stalling));
        let counter = seen.clone();
        dispatcher.subscribe(Arc::new(FnAlertCallback::new("counting", move |_: &SecurityAlert| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        let started = tokio::time::Instant::now();
        dispatcher.dispatch_detached(alert());

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(dispatcher.history().len(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.failed_deliveries(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dispatcher = AlertDispatcher::new(3);
        for _ in 0..5 {
            dispatcher.dispatch(alert()).await;
        }
        assert_eq!(dispatcher.history().len(), 3);
        assert_eq!(dispatcher.recent(2).len(), 2);
        assert_eq!(dispatcher.dispatched_count(), 5);
    }
}
