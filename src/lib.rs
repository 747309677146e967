//! dbweave - resilient multi-mode database access layer
//!
//! dbweave routes every storage operation to one of three connection modes,
//! leases a pooled connection for it, and runs it through retry and circuit
//! breaking. Select-style reads are memoised in a TTL cache that mutations
//! invalidate per table, and a background monitor watches backend health and
//! the recent query stream, raising alerts and reconnecting when needed.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): query model, errors, configuration, and ports
//! - **Service Layer** (`services`): pooling, resilience, caching, monitoring
//! - **Adapters** (`adapters`): in-memory and SQLite storage backends
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and logging
//! - **CLI Layer** (`cli`): health, stats, and config commands
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dbweave::{adapters::MemoryBackend, Config, ConnectionMode, DatabaseService, SelectQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = MemoryBackend::new().with_table("trips");
//!     let service = DatabaseService::new(Config::default(), Arc::new(backend));
//!     service.start().await?;
//!
//!     let rows = service
//!         .select(SelectQuery::new("trips"), Some(ConnectionMode::Session))
//!         .await?;
//!     println!("{} trips", rows.len());
//!
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::{
    AlertSeverity, Config, ConnectionMode, CountQuery, DeleteQuery, DistanceMetric, Filter,
    FilterOp, FunctionCall, HealthCheckResult, HealthStatus, InsertQuery, OperationKind, Query,
    Row, SecurityAlert, SecurityEventKind, SelectQuery, UpdateQuery, UpsertQuery,
    VectorSearchQuery,
};
pub use domain::{DbError, DbResult, ErrorClass, StorageError};
pub use services::{DatabaseService, Monitor, MonitoringStatus, QueryMetrics};
