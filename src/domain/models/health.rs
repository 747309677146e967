//! Health check results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a successful probe by its response time.
    ///
    /// At or above `critical` is Critical, at or above `warning` is Warning.
    pub fn from_response_time(elapsed: Duration, warning: Duration, critical: Duration) -> Self {
        if elapsed >= critical {
            Self::Critical
        } else if elapsed >= warning {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: f64,
    pub message: String,
    pub details: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn new(status: HealthStatus, response_time: Duration, message: impl Into<String>) -> Self {
        Self {
            status,
            response_time_ms: response_time.as_secs_f64() * 1000.0,
            message: message.into(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// A result for a monitor that has not probed anything yet.
    pub fn unknown() -> Self {
        Self::new(HealthStatus::Unknown, Duration::ZERO, "no health check has run")
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
