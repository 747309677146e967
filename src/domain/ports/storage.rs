use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::{ConnectionMode, Query, Row};

/// A reusable client handle to the storage backend.
///
/// The access layer treats the backend as opaque: it hands over a structured
/// `Query` and gets rows back. A handle is only ever used by one caller at a
/// time, so calls on it are strictly sequential.
#[async_trait]
pub trait StorageConnection: Send + Sync {
    /// Execute a query and return its rows.
    ///
    /// Mutations return the affected rows; `Count` returns a single row with
    /// a `count` column; `Probe` returns an empty or trivial result.
    async fn execute(&mut self, query: &Query) -> Result<Vec<Row>, StorageError>;

    /// Cheapest possible round-trip used to verify the handle is usable.
    async fn probe(&mut self) -> Result<(), StorageError> {
        self.execute(&Query::Probe).await.map(|_| ())
    }
}

/// Creates storage handles for the pool manager.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, mode: ConnectionMode) -> Result<Box<dyn StorageConnection>, StorageError>;

    /// Backend name used in logs and stats.
    fn backend_name(&self) -> &str {
        "storage"
    }
}
