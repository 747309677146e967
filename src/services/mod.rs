//! Services of the access layer.
//!
//! Leaves first: mode routing, retry and circuit breaking, pooling, caching,
//! query tracking and alert fan-out, then the monitor and the
//! [`DatabaseService`] facade that composes them.

pub mod alert_dispatcher;
pub mod circuit_breaker;
pub mod mode_router;
pub mod monitor;
pub mod pool_manager;
pub mod query_cache;
pub mod query_engine;
pub mod query_tracker;
pub mod resilient_executor;
pub mod retry;

pub use alert_dispatcher::AlertDispatcher;
pub use circuit_breaker::{CircuitBreakerRegistry, CircuitState, CircuitStats};
pub use mode_router::resolve_mode;
pub use monitor::{Monitor, MonitoringStatus};
pub use pool_manager::{ConnectionLease, ModePoolStats, PoolManager, PoolStats, PooledConnection};
pub use query_cache::{CacheKey, CacheStats, QueryCache};
pub use query_engine::{ConnectionStats, DatabaseService};
pub use query_tracker::{QueryMetrics, QueryTracker};
pub use resilient_executor::ResilientExecutor;
pub use retry::RetryPolicy;
