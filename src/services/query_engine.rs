//! CRUD and vector-search facade over the access layer.
//!
//! Every operation resolves its connection mode, consults the cache for
//! reads, borrows a connection and runs the storage call under the retry
//! policy and circuit breaker. Each call is recorded by the query tracker,
//! and successful mutations invalidate their table's cached results before
//! the call returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use crate::domain::errors::{DbError, DbResult, ErrorClass, StorageError};
use crate::domain::models::{
    Config, ConnectionMode, CountQuery, DeleteQuery, Filter, FunctionCall, HealthCheckResult,
    InsertQuery, OperationKind, Query, Row, SecurityAlert, SelectQuery, UpdateQuery, UpsertQuery,
    VectorSearchQuery,
};
use crate::domain::ports::{AlertCallback, ConnectionFactory, HealthProbe};
use crate::services::alert_dispatcher::AlertDispatcher;
use crate::services::circuit_breaker::{CircuitBreakerRegistry, CircuitStats};
use crate::services::mode_router::resolve_mode;
use crate::services::monitor::{Monitor, MonitoringStatus};
use crate::services::pool_manager::{PoolManager, PoolStats};
use crate::services::query_cache::{CacheKey, CacheStats, QueryCache};
use crate::services::query_tracker::{QueryMetrics, QueryTracker};
use crate::services::resilient_executor::ResilientExecutor;
use crate::services::retry::RetryPolicy;

/// Combined pool, cache and circuit snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub pools: PoolStats,
    pub cache: CacheStats,
    pub circuit_name: String,
    pub circuits: Vec<CircuitStats>,
}

/// Entry point for every database operation.
///
/// Constructed once by the application and shared by reference; `start`
/// and `stop` bracket its background work.
pub struct DatabaseService {
    config: Config,
    pools: PoolManager,
    executor: ResilientExecutor,
    cache: QueryCache,
    tracker: Arc<QueryTracker>,
    alerts: Arc<AlertDispatcher>,
    monitor: Arc<Monitor>,
}

impl DatabaseService {
    pub fn new(config: Config, factory: Arc<dyn ConnectionFactory>) -> Self {
        let alerts = Arc::new(
            AlertDispatcher::new(config.monitor.alert_history_capacity)
                .with_callback_timeout(config.monitor.alert_callback_timeout()),
        );
        let pools = PoolManager::new(config.pool.clone(), factory, Arc::clone(&alerts));
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let executor = ResilientExecutor::new(
            RetryPolicy::new(&config.retry),
            breakers,
            Arc::clone(&alerts),
            config.query_timeout(),
        );
        let cache = QueryCache::new(&config.cache);
        let tracker = Arc::new(QueryTracker::new(
            config.monitor.history_capacity,
            config.monitor.max_queries_per_second,
        ));
        let probe: Arc<dyn HealthProbe> = Arc::new(pools.clone());
        let monitor = Arc::new(Monitor::new(
            config.monitor.clone(),
            probe,
            Arc::clone(&tracker),
            Arc::clone(&alerts),
        ));

        Self {
            config,
            pools,
            executor,
            cache,
            tracker,
            alerts,
            monitor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Warm the pools and start the maintenance, health and security loops.
    pub async fn start(&self) -> DbResult<()> {
        self.pools.warm_up().await?;
        self.pools.start_maintenance();
        self.monitor.start();
        tracing::info!(circuit = %self.config.circuit_name, "database service started");
        Ok(())
    }

    /// Stop the background loops and close the pools.
    pub async fn stop(&self) {
        self.monitor.stop().await;
        self.pools.shutdown().await;
        tracing::info!("database service stopped");
    }

    pub async fn select(&self, query: SelectQuery, mode: Option<ConnectionMode>) -> DbResult<Vec<Row>> {
        require_table(&query.table)?;
        let key = CacheKey::for_select(&query);
        let mode = resolve_mode(OperationKind::Select, mode);
        let query = Query::Select(query);

        let rows = self
            .cache
            .get_or_compute(key, None, || self.run(&query, mode))
            .await?;
        Ok(rows.as_ref().clone())
    }

    /// Point lookup. Raises `NotFound` when no row has `id_column = id`.
    pub async fn get_by_id(
        &self,
        table: &str,
        id_column: &str,
        id: impl Into<Value>,
        mode: Option<ConnectionMode>,
    ) -> DbResult<Row> {
        let id = id.into();
        let query = SelectQuery::new(table)
            .filter(Filter::eq(id_column, id.clone()))
            .limit(1);

        self.select(query, mode)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound {
                table: table.to_string(),
                detail: format!("no row with {id_column} = {id}"),
            })
    }

    pub async fn insert(&self, table: &str, rows: Vec<Row>, mode: Option<ConnectionMode>) -> DbResult<Vec<Row>> {
        require_table(table)?;
        if rows.is_empty() {
            return Err(DbError::validation("insert needs at least one row"));
        }
        let query = Query::Insert(InsertQuery {
            table: table.to_string(),
            rows,
        });
        self.mutate(query, mode).await
    }

    /// Update rows matching `filters`. An empty filter list is rejected.
    pub async fn update(
        &self,
        table: &str,
        values: Row,
        filters: Vec<Filter>,
        mode: Option<ConnectionMode>,
    ) -> DbResult<Vec<Row>> {
        require_table(table)?;
        if values.is_empty() {
            return Err(DbError::validation("update needs at least one column value"));
        }
        if filters.is_empty() {
            return Err(DbError::validation("update without filters is not allowed"));
        }
        let query = Query::Update(UpdateQuery {
            table: table.to_string(),
            values,
            filters,
        });
        self.mutate(query, mode).await
    }

    /// Delete rows matching `filters`. An empty filter list is rejected.
    pub async fn delete(&self, table: &str, filters: Vec<Filter>, mode: Option<ConnectionMode>) -> DbResult<Vec<Row>> {
        require_table(table)?;
        if filters.is_empty() {
            return Err(DbError::validation("delete without filters is not allowed"));
        }
        let query = Query::Delete(DeleteQuery {
            table: table.to_string(),
            filters,
        });
        self.mutate(query, mode).await
    }

    pub async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict_columns: Vec<String>,
        mode: Option<ConnectionMode>,
    ) -> DbResult<Vec<Row>> {
        require_table(table)?;
        if rows.is_empty() {
            return Err(DbError::validation("upsert needs at least one row"));
        }
        if conflict_columns.is_empty() {
            return Err(DbError::validation("upsert needs at least one conflict column"));
        }
        if let Some(column) = conflict_columns
            .iter()
            .find(|c| rows.iter().any(|row| !row.contains_key(c.as_str())))
        {
            return Err(DbError::validation(format!(
                "every upserted row must carry conflict column '{column}'"
            )));
        }
        let query = Query::Upsert(UpsertQuery {
            table: table.to_string(),
            rows,
            conflict_columns,
        });
        self.mutate(query, mode).await
    }

    pub async fn count(&self, table: &str, filters: Vec<Filter>, mode: Option<ConnectionMode>) -> DbResult<u64> {
        require_table(table)?;
        let query = CountQuery {
            table: table.to_string(),
            filters,
        };
        let key = CacheKey::for_count(&query);
        let mode = resolve_mode(OperationKind::Count, mode);
        let query = Query::Count(query);

        let rows = self
            .cache
            .get_or_compute(key, None, || self.run(&query, mode))
            .await?;
        rows.first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                DbError::storage(
                    OperationKind::Count,
                    table,
                    StorageError::Backend("count result has no 'count' column".into()),
                )
            })
    }

    /// The `k` nearest rows by the query's metric, nearest first.
    ///
    /// Every returned row carries `distance` and `similarity` fields.
    pub async fn vector_search(
        &self,
        query: VectorSearchQuery,
        mode: Option<ConnectionMode>,
    ) -> DbResult<Vec<Row>> {
        validate_vector_search(&query)?;
        let key = CacheKey::for_vector_search(&query);
        let mode = resolve_mode(OperationKind::VectorSearch, mode);
        let request = Query::VectorSearch(query.clone());

        let rows = self
            .cache
            .get_or_compute(key, None, || async {
                let candidates = self.run(&request, mode).await?;
                Ok(query.rank(candidates))
            })
            .await?;
        Ok(rows.as_ref().clone())
    }

    /// Call a remote procedure.
    ///
    /// Tables named in `call.invalidates` have their cached results dropped
    /// when the call succeeds.
    pub async fn call_function(&self, call: FunctionCall, mode: Option<ConnectionMode>) -> DbResult<Vec<Row>> {
        if call.name.trim().is_empty() {
            return Err(DbError::validation("function name must not be empty"));
        }
        let mode = resolve_mode(OperationKind::Function, mode);
        let invalidates = call.invalidates.clone();
        let rows = self.run(&Query::Function(call), mode).await?;
        for table in &invalidates {
            self.cache.invalidate_table(table);
        }
        Ok(rows)
    }

    /// Run an administrative statement on a dedicated connection.
    ///
    /// The statement text is kept with the tracked execution so the
    /// security loop can inspect it.
    pub async fn execute_raw(&self, statement: &str, mode: Option<ConnectionMode>) -> DbResult<Vec<Row>> {
        if statement.trim().is_empty() {
            return Err(DbError::validation("statement must not be empty"));
        }
        let mode = resolve_mode(OperationKind::Raw, mode);
        let query = Query::Raw {
            statement: statement.to_string(),
        };
        self.run(&query, mode).await
    }

    async fn mutate(&self, query: Query, mode: Option<ConnectionMode>) -> DbResult<Vec<Row>> {
        let mode = resolve_mode(query.kind(), mode);
        let rows = self.run(&query, mode).await?;
        self.cache.invalidate_table(query.target());
        Ok(rows)
    }

    /// Run one storage call through the executor and record it.
    #[instrument(
        name = "db_operation",
        skip_all,
        fields(operation = %query.kind(), table = %query.target(), mode = %mode)
    )]
    async fn run(&self, query: &Query, mode: ConnectionMode) -> DbResult<Vec<Row>> {
        let kind = query.kind();
        let statement = match query {
            Query::Raw { statement } => Some(statement.as_str()),
            _ => None,
        };
        let tracked = self.tracker.begin(kind, query.target(), mode, statement);

        let result = self
            .executor
            .execute(&self.config.circuit_name, kind.as_str(), || self.attempt(query, mode))
            .await;

        match &result {
            Ok(rows) => {
                tracing::debug!(rows = rows.len(), "operation completed");
                tracked.success(rows.len());
            }
            Err(e) => {
                match e.classification() {
                    ErrorClass::FixRequest => {
                        tracing::debug!(error = %e, "operation rejected")
                    }
                    _ => tracing::warn!(
                        error = %e,
                        class = ?e.classification(),
                        "operation failed"
                    ),
                }
                tracked.failure(e);
            }
        }
        result
    }

    /// One attempt: borrow, execute, release.
    async fn attempt(&self, query: &Query, mode: ConnectionMode) -> DbResult<Vec<Row>> {
        let mut lease = self.pools.acquire(mode, None).await?;
        let result = lease.execute(query).await;
        lease.release(result.is_ok());
        result.map_err(|e| DbError::storage(query.kind(), query.target(), e))
    }

    /// Probe the backend now.
    pub async fn health_check(&self) -> HealthCheckResult {
        self.monitor.manual_health_check().await
    }

    pub async fn security_check(&self) -> Vec<SecurityAlert> {
        self.monitor.manual_security_check().await
    }

    pub fn get_connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            pools: self.pools.stats(),
            cache: self.cache.stats(),
            circuit_name: self.config.circuit_name.clone(),
            circuits: self.executor.circuit_stats(),
        }
    }

    pub fn get_query_metrics(&self) -> QueryMetrics {
        self.tracker.metrics(self.config.monitor.slow_query())
    }

    pub fn get_monitoring_status(&self) -> MonitoringStatus {
        self.monitor.status()
    }

    pub fn subscribe_alerts(&self, callback: Arc<dyn AlertCallback>) {
        self.alerts.subscribe(callback);
    }

    pub fn alert_history(&self) -> Vec<SecurityAlert> {
        self.monitor.alert_history()
    }

    pub fn health_history(&self) -> Vec<HealthCheckResult> {
        self.monitor.health_history()
    }

    pub fn reset_circuit(&self, name: &str) {
        self.executor.reset_circuit(name);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn tracker(&self) -> &Arc<QueryTracker> {
        &self.tracker
    }
}

fn require_table(table: &str) -> DbResult<()> {
    if table.trim().is_empty() {
        return Err(DbError::validation("table name must not be empty"));
    }
    Ok(())
}

fn validate_vector_search(query: &VectorSearchQuery) -> DbResult<()> {
    require_table(&query.table)?;
    if query.vector_column.trim().is_empty() {
        return Err(DbError::validation("vector column must not be empty"));
    }
    if query.k == 0 {
        return Err(DbError::validation("k must be at least 1"));
    }
    if query.query_vector.is_empty() {
        return Err(DbError::validation("query vector must not be empty"));
    }
    if query.query_vector.iter().any(|x| !x.is_finite()) {
        return Err(DbError::validation("query vector has non-finite components"));
    }
    if let Some(threshold) = query.similarity_threshold {
        if !query.metric.accepts_threshold(threshold) {
            return Err(DbError::validation(format!(
                "similarity threshold {threshold} is out of range for {} distance",
                query.metric.as_str()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryBackend;
    use crate::domain::models::{DistanceMetric, ExecutionStatus};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn service(backend: &MemoryBackend) -> DatabaseService {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 5;
        DatabaseService::new(config, Arc::new(backend.clone()))
    }

    #[tokio::test]
    async fn test_get_by_id_missing_is_not_found() {
        let backend = MemoryBackend::new().with_table("trips");
        let service = service(&backend);

        let err = service.get_by_id("trips", "id", 42, None).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { ref table, .. } if table == "trips"));
    }

    #[tokio::test]
    async fn test_mutation_invalidates_cached_reads() {
        let backend = MemoryBackend::new().with_table("trips");
        let service = service(&backend);

        assert_eq!(service.count("trips", vec![], None).await.unwrap(), 0);
        service
            .insert("trips", vec![row(json!({"name": "Paris"}))], None)
            .await
            .unwrap();
        assert_eq!(service.count("trips", vec![], None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_batch_keeps_cache_and_store_in_step() {
        let backend = MemoryBackend::new();
        backend.seed("trips", vec![row(json!({"id": 1, "name": "Paris"}))]);
        let service = service(&backend);

        assert_eq!(service.count("trips", vec![], None).await.unwrap(), 1);
        let err = service
            .insert(
                "trips",
                vec![row(json!({"id": 10, "name": "Rome"})), row(json!({"id": 1, "name": "Oslo"}))],
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::PermanentStorage { .. }));
        assert_eq!(backend.rows("trips").len(), 1);
        assert_eq!(service.count("trips", vec![], None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bulk_mutations_without_filters_are_rejected() {
        let backend = MemoryBackend::new().with_table("trips");
        let service = service(&backend);

        let update = service
            .update("trips", row(json!({"name": "x"})), vec![], None)
            .await;
        let delete = service.delete("trips", vec![], None).await;
        let upsert = service
            .upsert("trips", vec![row(json!({"name": "x"}))], vec!["id".into()], None)
            .await;

        assert!(matches!(update, Err(DbError::Validation(_))));
        assert!(matches!(delete, Err(DbError::Validation(_))));
        assert!(matches!(upsert, Err(DbError::Validation(_))));
        assert_eq!(backend.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_vector_search_validation() {
        let backend = MemoryBackend::new().with_table("places");
        let service = service(&backend);

        let zero_k = VectorSearchQuery::new("places", "embedding", vec![1.0, 0.0], 0);
        let nan = VectorSearchQuery::new("places", "embedding", vec![f64::NAN], 3);
        let bad_floor = VectorSearchQuery::new("places", "embedding", vec![1.0], 3)
            .with_metric(DistanceMetric::L2)
            .with_threshold(0.0);

        for query in [zero_k, nan, bad_floor] {
            let err = service.vector_search(query, None).await.unwrap_err();
            assert!(matches!(err, DbError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_transparently() {
        let backend = MemoryBackend::new().with_table("trips");
        let service = service(&backend);
        backend.fail_next_executes(2);

        let rows = service.select(SelectQuery::new("trips"), None).await.unwrap();
        assert!(rows.is_empty());

        let history = service.tracker().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_function_call_invalidates_named_tables() {
        let backend = MemoryBackend::new().with_table("trips");
        backend.seed("trips", vec![row(json!({"name": "Oslo"}))]);
        backend.register_function("purge_trips", |_| Ok(vec![row(json!({"purged": true}))]));
        let service = service(&backend);

        service.select(SelectQuery::new("trips"), None).await.unwrap();
        service
            .call_function(FunctionCall::new("purge_trips", json!({})).invalidating("trips"), None)
            .await
            .unwrap();
        service.select(SelectQuery::new("trips"), None).await.unwrap();

        let stats = service.get_connection_stats();
        assert_eq!(stats.cache.hits, 0);
        assert_eq!(stats.cache.misses, 2);
        assert!(stats.pools.mode(ConnectionMode::Direct).is_some());
    }

    #[tokio::test]
    async fn test_raw_statement_is_recorded_in_direct_mode() {
        let backend = MemoryBackend::new();
        let service = service(&backend);

        service.execute_raw("VACUUM", None).await.unwrap();
        let history = service.tracker().history();
        assert_eq!(history[0].mode, ConnectionMode::Direct);
        assert_eq!(history[0].statement.as_deref(), Some("VACUUM"));
        assert_eq!(backend.statements(), vec!["VACUUM".to_string()]);
    }
}
