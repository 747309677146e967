//! In-process storage backend.
//!
//! Tables live in memory and are shared by every connection made from the
//! same [`MemoryBackend`]. Faults (refused connections, failing calls,
//! failing probes, latency) can be injected to exercise the resilience
//! machinery without a real database.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::StorageError;
use crate::domain::models::query::{order_values, values_equal};
use crate::domain::models::{
    ConnectionMode, CountQuery, DeleteQuery, Filter, FunctionCall, InsertQuery, Query, Row,
    SelectQuery, UpdateQuery, UpsertQuery, VectorSearchQuery,
};
use crate::domain::ports::{ConnectionFactory, StorageConnection};

type FunctionHandler = Arc<dyn Fn(&Value) -> Result<Vec<Row>, StorageError> + Send + Sync>;

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn assign_id(&mut self, row: &mut Row) {
        assign_id(&mut self.next_id, row);
    }

    fn has_id(&self, id: &Value) -> bool {
        self.rows
            .iter()
            .any(|r| r.get("id").is_some_and(|v| values_equal(v, id)))
    }

    fn matching<'a>(&'a self, filters: &'a [Filter]) -> impl Iterator<Item = &'a Row> + 'a {
        self.rows
            .iter()
            .filter(move |row| filters.iter().all(|f| f.matches(row)))
    }
}

/// Keep a caller-supplied id, generate one when it is missing or null.
fn assign_id(next_id: &mut i64, row: &mut Row) {
    match row.get("id") {
        Some(Value::Null) | None => {
            *next_id += 1;
            row.insert("id".into(), Value::from(*next_id));
        }
        Some(id) => {
            if let Some(id) = id.as_i64() {
                *next_id = (*next_id).max(id);
            }
        }
    }
}

#[derive(Default)]
struct Faults {
    down: bool,
    connect_failures: u32,
    execute_failures: VecDeque<StorageError>,
    probe_failures: u32,
    latency: Duration,
    probe_latency: Duration,
}

#[derive(Default)]
struct MemoryInner {
    tables: RwLock<HashMap<String, Table>>,
    functions: RwLock<HashMap<String, FunctionHandler>>,
    faults: Mutex<Faults>,
    statements: Mutex<Vec<String>>,
    connects: AtomicU64,
    executes: AtomicU64,
    open: AtomicUsize,
    peak_open: AtomicUsize,
}

/// Shared in-memory database and connection factory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryBackend::create_table`].
    pub fn with_table(self, name: &str) -> Self {
        self.create_table(name);
        self
    }

    pub fn create_table(&self, name: &str) {
        self.inner.tables.write().entry(name.to_string()).or_default();
    }

    /// Insert rows directly, bypassing connections and fault injection.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut tables = self.inner.tables.write();
        let table = tables.entry(table.to_string()).or_default();
        for mut row in rows {
            table.assign_id(&mut row);
            table.rows.push(row);
        }
    }

    /// Current contents of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn register_function<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Vec<Row>, StorageError> + Send + Sync + 'static,
    {
        self.inner
            .functions
            .write()
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Make every connect and call fail until cleared.
    pub fn set_down(&self, down: bool) {
        self.inner.faults.lock().down = down;
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.inner.faults.lock().connect_failures = n;
    }

    /// Fail the next `n` non-probe calls with a connection error.
    pub fn fail_next_executes(&self, n: u32) {
        self.fail_next_executes_with(n, StorageError::Connection("connection reset".into()));
    }

    pub fn fail_next_executes_with(&self, n: u32, error: StorageError) {
        let mut faults = self.inner.faults.lock();
        for _ in 0..n {
            faults.execute_failures.push_back(error.clone());
        }
    }

    pub fn fail_next_probes(&self, n: u32) {
        self.inner.faults.lock().probe_failures = n;
    }

    /// Delay added to every non-probe call.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.faults.lock().latency = latency;
    }

    pub fn set_probe_latency(&self, latency: Duration) {
        self.inner.faults.lock().probe_latency = latency;
    }

    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn execute_count(&self) -> u64 {
        self.inner.executes.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections seen.
    pub fn peak_open_connections(&self) -> usize {
        self.inner.peak_open.load(Ordering::SeqCst)
    }

    /// Raw statements received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.inner.statements.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryBackend {
    async fn connect(&self, mode: ConnectionMode) -> Result<Box<dyn StorageConnection>, StorageError> {
        {
            let mut faults = self.inner.faults.lock();
            if faults.down {
                return Err(StorageError::Connection("backend unavailable".into()));
            }
            if faults.connect_failures > 0 {
                faults.connect_failures -= 1;
                return Err(StorageError::Connection("connection refused".into()));
            }
        }

        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let open = self.inner.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            inner: self.inner.clone(),
            mode,
        }))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// One handle onto a [`MemoryBackend`].
pub struct MemoryConnection {
    inner: Arc<MemoryInner>,
    mode: ConnectionMode,
}

impl MemoryConnection {
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    fn run(&self, query: &Query) -> Result<Vec<Row>, StorageError> {
        match query {
            Query::Select(q) => self.select(q),
            Query::Count(q) => self.count(q),
            Query::VectorSearch(q) => self.vector_candidates(q),
            Query::Insert(q) => self.insert(q),
            Query::Update(q) => self.update(q),
            Query::Delete(q) => self.delete(q),
            Query::Upsert(q) => self.upsert(q),
            Query::Function(call) => self.call(call),
            Query::Raw { statement } => {
                self.inner.statements.lock().push(statement.clone());
                Ok(Vec::new())
            }
            Query::Probe => Ok(Vec::new()),
        }
    }

    fn select(&self, q: &SelectQuery) -> Result<Vec<Row>, StorageError> {
        let tables = self.inner.tables.read();
        let table = tables
            .get(&q.table)
            .ok_or_else(|| StorageError::UnknownTable(q.table.clone()))?;

        let mut rows: Vec<Row> = table.matching(&q.filters).cloned().collect();
        if !q.order.is_empty() {
            rows.sort_by(|a, b| {
                for order in &q.order {
                    let left = a.get(&order.column).unwrap_or(&Value::Null);
                    let right = b.get(&order.column).unwrap_or(&Value::Null);
                    let ord = order_values(left, right);
                    let ord = if order.descending { ord.reverse() } else { ord };
                    if ord.is_ne() {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let offset = q.offset.unwrap_or(0) as usize;
        let limit = q.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &q.columns))
            .collect())
    }

    fn count(&self, q: &CountQuery) -> Result<Vec<Row>, StorageError> {
        let tables = self.inner.tables.read();
        let table = tables
            .get(&q.table)
            .ok_or_else(|| StorageError::UnknownTable(q.table.clone()))?;
        let mut row = Row::new();
        row.insert("count".into(), Value::from(table.matching(&q.filters).count()));
        Ok(vec![row])
    }

    fn vector_candidates(&self, q: &VectorSearchQuery) -> Result<Vec<Row>, StorageError> {
        let tables = self.inner.tables.read();
        let table = tables
            .get(&q.table)
            .ok_or_else(|| StorageError::UnknownTable(q.table.clone()))?;
        Ok(table.matching(&q.filters).cloned().collect())
    }

    fn insert(&self, q: &InsertQuery) -> Result<Vec<Row>, StorageError> {
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(&q.table)
            .ok_or_else(|| StorageError::UnknownTable(q.table.clone()))?;

        // Staged first so a rejected batch leaves the table untouched.
        let mut next_id = table.next_id;
        let mut staged: Vec<Row> = Vec::with_capacity(q.rows.len());
        for row in &q.rows {
            let mut row = row.clone();
            if let Some(id) = row.get("id").filter(|v| !v.is_null()) {
                let in_batch = staged
                    .iter()
                    .any(|r| r.get("id").is_some_and(|v| values_equal(v, id)));
                if in_batch || table.has_id(id) {
                    return Err(StorageError::Constraint(format!(
                        "duplicate id {id} in {}",
                        q.table
                    )));
                }
            }
            assign_id(&mut next_id, &mut row);
            staged.push(row);
        }

        table.next_id = next_id;
        table.rows.extend(staged.iter().cloned());
        Ok(staged)
    }

    fn update(&self, q: &UpdateQuery) -> Result<Vec<Row>, StorageError> {
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(&q.table)
            .ok_or_else(|| StorageError::UnknownTable(q.table.clone()))?;

        let mut updated = Vec::new();
        for row in table.rows.iter_mut() {
            if q.filters.iter().all(|f| f.matches(row)) {
                for (column, value) in &q.values {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    fn delete(&self, q: &DeleteQuery) -> Result<Vec<Row>, StorageError> {
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(&q.table)
            .ok_or_else(|| StorageError::UnknownTable(q.table.clone()))?;

        let (removed, kept): (Vec<Row>, Vec<Row>) = std::mem::take(&mut table.rows)
            .into_iter()
            .partition(|row| q.filters.iter().all(|f| f.matches(row)));
        table.rows = kept;
        Ok(removed)
    }

    fn upsert(&self, q: &UpsertQuery) -> Result<Vec<Row>, StorageError> {
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(&q.table)
            .ok_or_else(|| StorageError::UnknownTable(q.table.clone()))?;

        let mut stored = Vec::with_capacity(q.rows.len());
        for row in &q.rows {
            let existing = table.rows.iter_mut().find(|candidate| {
                q.conflict_columns.iter().all(|column| {
                    match (candidate.get(column), row.get(column)) {
                        (Some(a), Some(b)) => !a.is_null() && values_equal(a, b),
                        _ => false,
                    }
                })
            });
            match existing {
                Some(target) => {
                    for (column, value) in row {
                        target.insert(column.clone(), value.clone());
                    }
                    stored.push(target.clone());
                }
                None => {
                    let mut row = row.clone();
                    table.assign_id(&mut row);
                    table.rows.push(row.clone());
                    stored.push(row);
                }
            }
        }
        Ok(stored)
    }

    fn call(&self, call: &FunctionCall) -> Result<Vec<Row>, StorageError> {
        let handler = self
            .inner
            .functions
            .read()
            .get(&call.name)
            .cloned()
            .ok_or_else(|| StorageError::InvalidQuery(format!("unknown function {}", call.name)))?;
        handler(&call.params)
    }
}

fn project(row: Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row;
    }
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl StorageConnection for MemoryConnection {
    async fn execute(&mut self, query: &Query) -> Result<Vec<Row>, StorageError> {
        let is_probe = matches!(query, Query::Probe);
        if !is_probe {
            self.inner.executes.fetch_add(1, Ordering::SeqCst);
        }
        let (latency, injected) = {
            let mut faults = self.inner.faults.lock();
            let latency = if is_probe {
                faults.probe_latency
            } else {
                faults.latency
            };
            let injected = if faults.down {
                Some(StorageError::Connection("backend unavailable".into()))
            } else if is_probe && faults.probe_failures > 0 {
                faults.probe_failures -= 1;
                Some(StorageError::Connection("probe failed".into()))
            } else if is_probe {
                None
            } else {
                faults.execute_failures.pop_front()
            };
            (latency, injected)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = injected {
            return Err(error);
        }
        self.run(query)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.inner.open.fetch_sub(1, Ordering::SeqCst);
    }
}
