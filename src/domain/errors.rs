//! Error types for the database access layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::{ConnectionMode, OperationKind};

/// Failure reported by a storage backend for a single round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage call timed out")]
    Timeout,

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Network, timeout and connection failures may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Network(_) | Self::Timeout)
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Network(_))
    }
}

/// Coarse failure category recorded on tracked executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Timeout,
    Storage,
    Validation,
    NotFound,
    CircuitOpen,
    PoolExhausted,
}

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RetryLater,
    FixRequest,
    OperatorAttention,
}

/// Errors surfaced by the access layer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection pool exhausted for {mode} mode after waiting {waited_ms}ms")]
    PoolExhausted { mode: ConnectionMode, waited_ms: u64 },

    #[error("Failed to create {mode} connection: {reason}")]
    ConnectionCreateFailed { mode: ConnectionMode, reason: String },

    #[error("Circuit '{circuit}' is open, retry after {retry_after_ms}ms")]
    CircuitOpen { circuit: String, retry_after_ms: u64 },

    #[error("{operation} timed out after {after_ms}ms")]
    TimedOut { operation: String, after_ms: u64 },

    #[error("Not found in {table}: {detail}")]
    NotFound { table: String, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transient storage error during {operation} on {table} after {attempts} attempt(s): {source}")]
    TransientStorage {
        operation: OperationKind,
        table: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("Storage error during {operation} on {table}: {source}")]
    PermanentStorage {
        operation: OperationKind,
        table: String,
        #[source]
        source: StorageError,
    },
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Wrap a backend failure with the operation context it happened in.
    pub fn storage(operation: OperationKind, table: impl Into<String>, source: StorageError) -> Self {
        let table = table.into();
        if source.is_transient() {
            Self::TransientStorage {
                operation,
                table,
                attempts: 1,
                source,
            }
        } else {
            Self::PermanentStorage {
                operation,
                table,
                source,
            }
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Record how many attempts were spent before this error surfaced.
    #[must_use]
    pub fn with_attempts(self, total: u32) -> Self {
        match self {
            Self::TransientStorage {
                operation,
                table,
                source,
                ..
            } => Self::TransientStorage {
                operation,
                table,
                attempts: total,
                source,
            },
            other => other,
        }
    }

    /// Errors worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientStorage { .. } | Self::TimedOut { .. } | Self::ConnectionCreateFailed { .. }
        )
    }

    /// Errors that say something about the backend's health.
    ///
    /// Caller mistakes and local back-pressure do not trip circuit breakers.
    pub fn is_backend_failure(&self) -> bool {
        match self {
            Self::TransientStorage { .. } | Self::TimedOut { .. } | Self::ConnectionCreateFailed { .. } => true,
            Self::PermanentStorage { .. } => self.classification() != ErrorClass::FixRequest,
            _ => false,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::PoolExhausted { .. } => FailureKind::PoolExhausted,
            Self::ConnectionCreateFailed { .. } => FailureKind::Connection,
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::TimedOut { .. } => FailureKind::Timeout,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Validation(_) => FailureKind::Validation,
            Self::TransientStorage { source, .. } | Self::PermanentStorage { source, .. } => {
                if source.is_connection() {
                    FailureKind::Connection
                } else if matches!(source, StorageError::Timeout) {
                    FailureKind::Timeout
                } else {
                    FailureKind::Storage
                }
            }
        }
    }

    pub fn classification(&self) -> ErrorClass {
        match self {
            Self::PoolExhausted { .. }
            | Self::CircuitOpen { .. }
            | Self::TimedOut { .. }
            | Self::TransientStorage { .. } => ErrorClass::RetryLater,
            Self::Validation(_) | Self::NotFound { .. } => ErrorClass::FixRequest,
            Self::PermanentStorage { source, .. } => match source {
                StorageError::Backend(_) => ErrorClass::OperatorAttention,
                _ => ErrorClass::FixRequest,
            },
            Self::ConnectionCreateFailed { .. } => ErrorClass::OperatorAttention,
        }
    }
}
