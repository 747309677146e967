//! Security alerts raised by the monitor, pool and circuit breakers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    SuspiciousQuery,
    ConnectionFailure,
    RateLimitExceeded,
    SlowQueryDetected,
    HighErrorRate,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuspiciousQuery => "suspicious_query",
            Self::ConnectionFailure => "connection_failure",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::SlowQueryDetected => "slow_query_detected",
            Self::HighErrorRate => "high_error_rate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub kind: SecurityEventKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(kind: SecurityEventKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
