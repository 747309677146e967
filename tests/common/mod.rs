//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use dbweave::adapters::MemoryBackend;
use dbweave::domain::ports::{AlertCallback, FnAlertCallback};
use dbweave::{Config, DatabaseService, Row, SecurityAlert};

/// Configuration with short backoffs so retrying tests stay fast.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.retry.randomization_factor = 0.0;
    config.monitor.max_queries_per_second = 0;
    config
}

pub fn service_over(backend: &MemoryBackend, config: Config) -> DatabaseService {
    DatabaseService::new(config, Arc::new(backend.clone()))
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Alert subscriber that keeps every alert it receives.
pub fn recording_callback(name: &str) -> (Arc<dyn AlertCallback>, Arc<Mutex<Vec<SecurityAlert>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback = FnAlertCallback::new(name, move |alert: &SecurityAlert| {
        sink.lock().push(alert.clone());
        Ok(())
    });
    (Arc::new(callback), seen)
}

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
