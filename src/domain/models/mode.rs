//! Connection modes and operation kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pooling strategy used for a single operation.
///
/// Chosen once per call and immutable for the rest of that call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Dedicated, unpooled handle for administrative or multi-statement work.
    Direct,
    /// Session-affine pool that preserves session-level ordering (mutations).
    Session,
    /// Throughput-optimized pool for idempotent reads.
    Transaction,
}

impl ConnectionMode {
    /// All modes, in a stable order.
    pub const ALL: [Self; 3] = [Self::Direct, Self::Session, Self::Transaction];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Session => "session",
            Self::Transaction => "transaction",
        }
    }

    /// Whether released handles of this mode go back to an idle set.
    pub fn is_pooled(&self) -> bool {
        !matches!(self, Self::Direct)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of operation issued against the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Select,
    Count,
    VectorSearch,
    Insert,
    Update,
    Delete,
    Upsert,
    /// Remote procedure call.
    Function,
    /// Raw administrative statement.
    Raw,
    /// Health probe.
    Probe,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Count => "count",
            Self::VectorSearch => "vector_search",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upsert => "upsert",
            Self::Function => "function",
            Self::Raw => "raw",
            Self::Probe => "probe",
        }
    }

    /// Idempotent reads whose results may be cached.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Select | Self::Count | Self::VectorSearch)
    }

    /// Operations that change table contents.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Delete | Self::Upsert
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
