pub mod alert;
pub mod config;
pub mod execution;
pub mod health;
pub mod mode;
pub mod query;
pub mod vector;

pub use alert::{AlertSeverity, SecurityAlert, SecurityEventKind};
pub use config::{
    BackendConfig, CacheConfig, CircuitBreakerConfig, Config, LoggingConfig, ModePoolConfig,
    MonitorConfig, PoolConfig, RetryConfig,
};
pub use execution::{ExecutionStatus, QueryExecution};
pub use health::{HealthCheckResult, HealthStatus};
pub use mode::{ConnectionMode, OperationKind};
pub use query::{
    CountQuery, DeleteQuery, Filter, FilterOp, FunctionCall, InsertQuery, OrderBy, Query, Row,
    SelectQuery, UpdateQuery, UpsertQuery, VectorSearchQuery,
};
pub use vector::DistanceMetric;
