//! Read-through, write-invalidated cache of query results.

use moka::future::Cache;
use moka::Expiry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::errors::DbResult;
use crate::domain::models::{
    CacheConfig, CountQuery, Filter, OperationKind, Row, SelectQuery, VectorSearchQuery,
};

/// Normalized signature of a read.
///
/// Filters and projected columns are sorted, since neither their order in a
/// query nor in a result row changes the result. Ordering clauses keep their
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: OperationKind,
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<(String, String, String)>,
    pub order: Vec<(String, bool)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Operation-specific parameters outside the common shape.
    pub extra: Option<String>,
}

fn normalize_filters(filters: &[Filter]) -> Vec<(String, String, String)> {
    let mut out: Vec<_> = filters
        .iter()
        .map(|f| (f.column.clone(), f.op.as_str().to_string(), f.value.to_string()))
        .collect();
    out.sort();
    out
}

impl CacheKey {
    pub fn for_select(query: &SelectQuery) -> Self {
        let mut columns = query.columns.clone();
        columns.sort();
        columns.dedup();
        Self {
            operation: OperationKind::Select,
            table: query.table.clone(),
            columns,
            filters: normalize_filters(&query.filters),
            order: query
                .order
                .iter()
                .map(|o| (o.column.clone(), o.descending))
                .collect(),
            limit: query.limit,
            offset: query.offset,
            extra: None,
        }
    }

    pub fn for_count(query: &CountQuery) -> Self {
        Self {
            operation: OperationKind::Count,
            table: query.table.clone(),
            columns: Vec::new(),
            filters: normalize_filters(&query.filters),
            order: Vec::new(),
            limit: None,
            offset: None,
            extra: None,
        }
    }

    pub fn for_vector_search(query: &VectorSearchQuery) -> Self {
        let vector = query
            .query_vector
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self {
            operation: OperationKind::VectorSearch,
            table: query.table.clone(),
            columns: vec![query.vector_column.clone()],
            filters: normalize_filters(&query.filters),
            order: Vec::new(),
            limit: Some(query.k as u64),
            offset: None,
            extra: Some(format!(
                "{}|{:?}|[{}]",
                query.metric.as_str(),
                query.similarity_threshold,
                vector
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    rows: Arc<Vec<Row>>,
    inserted_at: Instant,
    ttl: Duration,
    generation: u64,
}

struct EntryTtl;

impl Expiry<CacheKey, CacheEntry> for EntryTtl {
    fn expire_after_create(&self, _key: &CacheKey, value: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub inserts: u64,
    pub stale_skips: u64,
    pub invalidations: u64,
}

/// Query result cache.
///
/// Every table has a generation counter bumped by `invalidate_table`. An
/// entry remembers the generation its result was computed under and is
/// ignored once the table has moved on, so a read racing with a mutation
/// can never put a pre-mutation result back into circulation.
pub struct QueryCache {
    cache: Option<Cache<CacheKey, CacheEntry>>,
    default_ttl: Duration,
    generations: Mutex<HashMap<String, u64>>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    stale_skips: AtomicU64,
    invalidations: AtomicU64,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = config.enabled.then(|| {
            Cache::builder()
                .max_capacity(config.max_capacity)
                .expire_after(EntryTtl)
                .support_invalidation_closures()
                .build()
        });
        Self {
            cache,
            default_ttl: config.ttl(),
            generations: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            stale_skips: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    fn generation(&self, table: &str) -> u64 {
        self.generations.lock().get(table).copied().unwrap_or(0)
    }

    /// Cached rows for `key` if present, unexpired and current.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Row>>> {
        let cache = self.cache.as_ref()?;
        let entry = cache.get(key).await?;
        if entry.inserted_at.elapsed() >= entry.ttl || entry.generation != self.generation(&key.table) {
            cache.invalidate(key).await;
            return None;
        }
        Some(entry.rows)
    }

    /// Return the cached result for `key`, or run `compute` and cache its
    /// result for `ttl` (default: the configured TTL).
    ///
    /// Errors from `compute` are returned as-is and never cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> DbResult<Arc<Vec<Row>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<Vec<Row>>>,
    {
        let Some(cache) = self.cache.as_ref() else {
            return compute().await.map(Arc::new);
        };

        if let Some(rows) = self.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(table = %key.table, operation = %key.operation, "cache hit");
            return Ok(rows);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let generation = self.generation(&key.table);
        let rows = Arc::new(compute().await?);

        if self.generation(&key.table) == generation {
            let entry = CacheEntry {
                rows: rows.clone(),
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                generation,
            };
            cache.insert(key, entry).await;
            self.inserts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stale_skips.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(table = %key.table, "table changed during read, result not cached");
        }
        Ok(rows)
    }

    /// Drop every cached result that reads `table`.
    pub fn invalidate_table(&self, table: &str) {
        *self.generations.lock().entry(table.to_string()).or_insert(0) += 1;
        self.invalidations.fetch_add(1, Ordering::Relaxed);

        if let Some(cache) = &self.cache {
            let table = table.to_string();
            if let Err(e) = cache.invalidate_entries_if(move |key, _| key.table == table) {
                // Entries stay unreachable through the generation check.
                tracing::warn!(error = %e, "failed to schedule cache invalidation");
            }
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            enabled: self.is_enabled(),
            entries: self.cache.as_ref().map_or(0, Cache::entry_count),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            inserts: self.inserts.load(Ordering::Relaxed),
            stale_skips: self.stale_skips.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Flush pending maintenance so `stats().entries` is exact.
    pub async fn sync(&self) {
        if let Some(cache) = &self.cache {
            cache.run_pending_tasks().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::OrderBy;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn rows(n: i64) -> Vec<Row> {
        vec![json!({"n": n}).as_object().cloned().unwrap()]
    }

    fn cache() -> QueryCache {
        QueryCache::new(&CacheConfig::default())
    }

    #[test]
    fn test_key_normalizes_filter_and_column_order() {
        let a = SelectQuery::new("trips")
            .filter(Filter::eq("a", 1))
            .filter(Filter::eq("b", 2))
            .columns(["x", "y"]);
        let b = SelectQuery::new("trips")
            .filter(Filter::eq("b", 2))
            .filter(Filter::eq("a", 1))
            .columns(["y", "x"]);
        assert_eq!(CacheKey::for_select(&a), CacheKey::for_select(&b));

        let asc = SelectQuery::new("trips").order_by(OrderBy::asc("a"));
        let desc = SelectQuery::new("trips").order_by(OrderBy::desc("a"));
        assert_ne!(CacheKey::for_select(&asc), CacheKey::for_select(&desc));
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        let key = CacheKey::for_select(&SelectQuery::new("trips"));

        for _ in 0..2 {
            let result = cache
                .get_or_compute(key.clone(), None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(rows(1))
                })
                .await
                .unwrap();
            assert_eq!(result.len(), 1);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_invalidate_table_forces_recompute() {
        let cache = cache();
        let trips = CacheKey::for_select(&SelectQuery::new("trips"));
        let users = CacheKey::for_select(&SelectQuery::new("users"));

        cache.get_or_compute(trips.clone(), None, || async { Ok(rows(1)) }).await.unwrap();
        cache.get_or_compute(users.clone(), None, || async { Ok(rows(1)) }).await.unwrap();

        cache.invalidate_table("trips");

        assert!(cache.get(&trips).await.is_none());
        assert!(cache.get(&users).await.is_some());
        let fresh = cache
            .get_or_compute(trips, None, || async { Ok(rows(2)) })
            .await
            .unwrap();
        assert_eq!(fresh[0]["n"], json!(2));
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let cache = cache();
        let key = CacheKey::for_count(&CountQuery {
            table: "trips".into(),
            filters: vec![],
        });

        cache
            .get_or_compute(key.clone(), Some(Duration::from_millis(20)), || async { Ok(rows(1)) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_result_computed_across_invalidation_is_not_stored() {
        let cache = cache();
        let key = CacheKey::for_select(&SelectQuery::new("trips"));

        cache
            .get_or_compute(key.clone(), None, || async {
                cache.invalidate_table("trips");
                Ok(rows(1))
            })
            .await
            .unwrap();

        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().stale_skips, 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = cache();
        let key = CacheKey::for_select(&SelectQuery::new("trips"));

        let result = cache
            .get_or_compute(key.clone(), None, || async {
                Err(crate::domain::errors::DbError::validation("boom"))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let cache = QueryCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let calls = AtomicUsize::new(0);
        let key = CacheKey::for_select(&SelectQuery::new("trips"));

        for _ in 0..3 {
            cache
                .get_or_compute(key.clone(), None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(rows(1))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cache.stats().enabled);
    }
}
