//! Maps operation kinds to connection modes.

use crate::domain::models::{ConnectionMode, OperationKind};

/// Pick the connection mode for an operation.
///
/// - Idempotent reads go to the throughput-oriented Transaction pool.
/// - Mutations go to the Session pool, which keeps session-level ordering.
/// - Functions, raw statements and probes get a dedicated Direct handle.
///
/// An explicit override always wins.
pub fn resolve_mode(operation: OperationKind, explicit: Option<ConnectionMode>) -> ConnectionMode {
    if let Some(mode) = explicit {
        return mode;
    }

    match operation {
        OperationKind::Select | OperationKind::Count | OperationKind::VectorSearch => {
            ConnectionMode::Transaction
        }
        OperationKind::Insert
        | OperationKind::Update
        | OperationKind::Delete
        | OperationKind::Upsert => ConnectionMode::Session,
        OperationKind::Function | OperationKind::Raw | OperationKind::Probe => ConnectionMode::Direct,
    }
}
