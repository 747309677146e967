//! Tracked query executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mode::{ConnectionMode, OperationKind};
use crate::domain::errors::FailureKind;

/// Outcome of a tracked execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Started, not yet finalized.
    Running,
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

/// One operation as seen by the query tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExecution {
    pub id: Uuid,
    pub operation: OperationKind,
    pub table: String,
    pub mode: ConnectionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `finished - started`, measured on a monotonic clock; never negative.
    pub duration_ms: f64,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub row_count: usize,
    /// Statement text, recorded for raw statements only.
    pub statement: Option<String>,
}

impl QueryExecution {
    pub fn start(operation: OperationKind, table: impl Into<String>, mode: ConnectionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            table: table.into(),
            mode,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0.0,
            status: ExecutionStatus::Running,
            error: None,
            error_kind: None,
            row_count: 0,
            statement: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
