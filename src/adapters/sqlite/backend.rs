//! Structured queries over SQLite.
//!
//! Handles share one driver pool; the mode pools above decide how many
//! handles exist and who holds them. Vector columns are stored as JSON array
//! text and ranked by the caller, so vector search only pushes the filters
//! down to SQL.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Number, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::sync::Arc;

use super::connection::{create_pool, ConnectionError, SqlitePoolSettings};
use crate::domain::errors::StorageError;
use crate::domain::models::{
    ConnectionMode, Filter, FilterOp, FunctionCall, OrderBy, Query, Row,
};
use crate::domain::ports::{ConnectionFactory, StorageConnection};

type SqlQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// A named SQL statement callable through `call_function`.
///
/// `params` lists the keys of the call's parameter object, bound to the
/// statement's `?` placeholders in order.
#[derive(Debug, Clone)]
pub struct SqlFunction {
    pub sql: String,
    pub params: Vec<String>,
}

/// SQLite connection factory.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    functions: Arc<RwLock<HashMap<String, SqlFunction>>>,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            functions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn connect(url: &str, settings: SqlitePoolSettings) -> Result<Self, ConnectionError> {
        let pool = create_pool(url, Some(settings)).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn register_function(&self, name: &str, sql: impl Into<String>, params: &[&str]) {
        self.functions.write().insert(
            name.to_string(),
            SqlFunction {
                sql: sql.into(),
                params: params.iter().map(|p| (*p).to_string()).collect(),
            },
        );
    }
}

#[async_trait]
impl ConnectionFactory for SqliteBackend {
    async fn connect(&self, mode: ConnectionMode) -> Result<Box<dyn StorageConnection>, StorageError> {
        if self.pool.is_closed() {
            return Err(StorageError::Connection("sqlite pool is closed".into()));
        }
        Ok(Box::new(SqliteHandle {
            pool: self.pool.clone(),
            functions: self.functions.clone(),
            mode,
        }))
    }

    fn backend_name(&self) -> &str {
        "sqlite"
    }
}

/// Reusable handle onto the shared SQLite pool.
pub struct SqliteHandle {
    pool: SqlitePool,
    functions: Arc<RwLock<HashMap<String, SqlFunction>>>,
    mode: ConnectionMode,
}

impl SqliteHandle {
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    async fn fetch(&self, sql: &str, binds: Vec<Value>) -> Result<Vec<Row>, StorageError> {
        let query = bind_all(sqlx::query(sql), binds);
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }

    /// Run one statement per item inside a single transaction.
    async fn fetch_batch(&self, statements: Vec<(String, Vec<Value>)>) -> Result<Vec<Row>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut out = Vec::new();
        for (sql, binds) in statements {
            let rows = bind_all(sqlx::query(&sql), binds)
                .fetch_all(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            for row in &rows {
                out.push(decode_row(row)?);
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(out)
    }

    async fn call(&self, call: &FunctionCall) -> Result<Vec<Row>, StorageError> {
        let function = self
            .functions
            .read()
            .get(&call.name)
            .cloned()
            .ok_or_else(|| StorageError::InvalidQuery(format!("unknown function {}", call.name)))?;
        let binds = function
            .params
            .iter()
            .map(|p| call.params.get(p).cloned().unwrap_or(Value::Null))
            .collect();
        self.fetch(&function.sql, binds).await
    }
}

#[async_trait]
impl StorageConnection for SqliteHandle {
    async fn execute(&mut self, query: &Query) -> Result<Vec<Row>, StorageError> {
        match query {
            Query::Select(q) => {
                let mut binds = Vec::new();
                let mut sql = format!(
                    "SELECT {} FROM {}{}",
                    projection(&q.columns),
                    quote(&q.table),
                    where_clause(&q.filters, &mut binds)
                );
                sql.push_str(&order_clause(&q.order));
                if q.limit.is_some() || q.offset.is_some() {
                    sql.push_str(" LIMIT ? OFFSET ?");
                    binds.push(q.limit.map_or(Value::from(-1), Value::from));
                    binds.push(Value::from(q.offset.unwrap_or(0)));
                }
                self.fetch(&sql, binds).await
            }
            Query::Count(q) => {
                let mut binds = Vec::new();
                let sql = format!(
                    "SELECT COUNT(*) AS count FROM {}{}",
                    quote(&q.table),
                    where_clause(&q.filters, &mut binds)
                );
                self.fetch(&sql, binds).await
            }
            Query::VectorSearch(q) => {
                let mut binds = Vec::new();
                let sql = format!(
                    "SELECT * FROM {}{}",
                    quote(&q.table),
                    where_clause(&q.filters, &mut binds)
                );
                self.fetch(&sql, binds).await
            }
            Query::Insert(q) => {
                let statements = q.rows.iter().map(|row| insert_statement(&q.table, row, None)).collect();
                self.fetch_batch(statements).await
            }
            Query::Upsert(q) => {
                let statements = q
                    .rows
                    .iter()
                    .map(|row| insert_statement(&q.table, row, Some(&q.conflict_columns)))
                    .collect();
                self.fetch_batch(statements).await
            }
            Query::Update(q) => {
                let mut binds: Vec<Value> = Vec::new();
                let assignments: Vec<String> = q
                    .values
                    .iter()
                    .map(|(column, value)| {
                        binds.push(value.clone());
                        format!("{} = ?", quote(column))
                    })
                    .collect();
                if assignments.is_empty() {
                    return Err(StorageError::InvalidQuery("update without values".into()));
                }
                let sql = format!(
                    "UPDATE {} SET {}{} RETURNING *",
                    quote(&q.table),
                    assignments.join(", "),
                    where_clause(&q.filters, &mut binds)
                );
                self.fetch(&sql, binds).await
            }
            Query::Delete(q) => {
                let mut binds = Vec::new();
                let sql = format!(
                    "DELETE FROM {}{} RETURNING *",
                    quote(&q.table),
                    where_clause(&q.filters, &mut binds)
                );
                self.fetch(&sql, binds).await
            }
            Query::Function(call) => self.call(call).await,
            Query::Raw { statement } => self.fetch(statement, Vec::new()).await,
            Query::Probe => self.fetch("SELECT 1 AS ok", Vec::new()).await,
        }
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn projection(columns: &[String]) -> String {
    if columns.is_empty() {
        "*".to_string()
    } else {
        columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
    }
}

fn where_clause(filters: &[Filter], binds: &mut Vec<Value>) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let predicates: Vec<String> = filters.iter().map(|f| predicate(f, binds)).collect();
    format!(" WHERE {}", predicates.join(" AND "))
}

fn predicate(filter: &Filter, binds: &mut Vec<Value>) -> String {
    let column = quote(&filter.column);
    let simple = |op: &str, binds: &mut Vec<Value>| {
        binds.push(filter.value.clone());
        format!("{column} {op} ?")
    };
    match filter.op {
        FilterOp::Eq => simple("=", binds),
        FilterOp::Gt => simple(">", binds),
        FilterOp::Gte => simple(">=", binds),
        FilterOp::Lt => simple("<", binds),
        FilterOp::Lte => simple("<=", binds),
        FilterOp::Like => simple("LIKE", binds),
        FilterOp::Neq => {
            binds.push(filter.value.clone());
            format!("({column} IS NULL OR {column} <> ?)")
        }
        FilterOp::IsNull => format!("{column} IS NULL"),
        FilterOp::In => match &filter.value {
            Value::Array(options) if !options.is_empty() => {
                binds.extend(options.iter().cloned());
                let marks = vec!["?"; options.len()].join(", ");
                format!("{column} IN ({marks})")
            }
            _ => "0 = 1".to_string(),
        },
    }
}

fn order_clause(order: &[OrderBy]) -> String {
    if order.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = order
        .iter()
        .map(|o| format!("{} {}", quote(&o.column), if o.descending { "DESC" } else { "ASC" }))
        .collect();
    format!(" ORDER BY {}", terms.join(", "))
}

fn insert_statement(table: &str, row: &Row, conflict: Option<&Vec<String>>) -> (String, Vec<Value>) {
    if row.is_empty() {
        return (format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quote(table)), Vec::new());
    }

    let columns: Vec<String> = row.keys().map(|c| quote(c)).collect();
    let binds: Vec<Value> = row.values().cloned().collect();
    let marks = vec!["?"; binds.len()].join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        columns.join(", "),
        marks
    );

    if let Some(conflict) = conflict {
        let updates: Vec<String> = row
            .keys()
            .filter(|c| !conflict.contains(c))
            .map(|c| format!("{0} = excluded.{0}", quote(c)))
            .collect();
        let target = conflict.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({target}) DO NOTHING"));
        } else {
            sql.push_str(&format!(" ON CONFLICT ({target}) DO UPDATE SET {}", updates.join(", ")));
        }
    }
    sql.push_str(" RETURNING *");
    (sql, binds)
}

fn bind_all(mut query: SqlQuery<'_>, binds: Vec<Value>) -> SqlQuery<'_> {
    for value in binds {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => query.bind(s),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Result<Row, StorageError> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i).map_err(map_sqlx_error)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                    Value::from(row.try_get_unchecked::<i64, _>(i).map_err(map_sqlx_error)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
                    let f = row.try_get_unchecked::<f64, _>(i).map_err(map_sqlx_error)?;
                    Number::from_f64(f).map_or(Value::Null, Value::Number)
                }
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(i).map_err(map_sqlx_error)?;
                    Value::from(bytes)
                }
                _ => Value::from(row.try_get_unchecked::<String, _>(i).map_err(map_sqlx_error)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn map_sqlx_error(error: sqlx::Error) -> StorageError {
    match error {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            if message.contains("no such table") {
                StorageError::UnknownTable(message)
            } else if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() {
                StorageError::Constraint(message)
            } else if message.contains("database is locked") || message.contains("busy") {
                StorageError::Timeout
            } else if message.contains("syntax error") || message.contains("no such column") {
                StorageError::InvalidQuery(message)
            } else {
                StorageError::Backend(message)
            }
        }
        sqlx::Error::PoolTimedOut => StorageError::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StorageError::Connection(error.to_string())
        }
        sqlx::Error::Io(e) => StorageError::Network(e.to_string()),
        sqlx::Error::Configuration(e) => StorageError::Connection(e.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::domain::models::{InsertQuery, SelectQuery, UpsertQuery};
    use serde_json::json;

    async fn backend() -> SqliteBackend {
        let pool = create_test_pool().await.unwrap();
        sqlx::query(
            "CREATE TABLE trips (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT UNIQUE, days INTEGER, score REAL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        SqliteBackend::new(pool)
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_where_clause_binds_in_order() {
        let mut binds = Vec::new();
        let sql = where_clause(
            &[
                Filter::eq("name", "Paris"),
                Filter::one_of("days", vec![json!(1), json!(2)]),
                Filter::is_null("score"),
            ],
            &mut binds,
        );
        assert_eq!(
            sql,
            " WHERE \"name\" = ? AND \"days\" IN (?, ?) AND \"score\" IS NULL"
        );
        assert_eq!(binds, vec![json!("Paris"), json!(1), json!(2)]);
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_insert_select_roundtrip() {
        let backend = backend().await;
        let mut handle = backend.connect(ConnectionMode::Session).await.unwrap();

        let inserted = handle
            .execute(&Query::Insert(InsertQuery {
                table: "trips".into(),
                rows: vec![row(json!({"name": "Paris", "days": 3, "score": 4.5}))],
            }))
            .await
            .unwrap();
        assert_eq!(inserted[0]["id"], json!(1));

        let rows = handle
            .execute(&Query::Select(
                SelectQuery::new("trips")
                    .filter(Filter::gte("days", 2))
                    .columns(["name", "score"]),
            ))
            .await
            .unwrap();
        assert_eq!(rows, vec![row(json!({"name": "Paris", "score": 4.5}))]);
    }

    #[tokio::test]
    async fn test_upsert_on_conflict() {
        let backend = backend().await;
        let mut handle = backend.connect(ConnectionMode::Session).await.unwrap();
        let upsert = |days: i64| {
            Query::Upsert(UpsertQuery {
                table: "trips".into(),
                rows: vec![row(json!({"name": "Rome", "days": days}))],
                conflict_columns: vec!["name".into()],
            })
        };

        handle.execute(&upsert(2)).await.unwrap();
        let rows = handle.execute(&upsert(5)).await.unwrap();

        assert_eq!(rows[0]["days"], json!(5));
        let count = handle
            .execute(&Query::Count(crate::domain::models::CountQuery {
                table: "trips".into(),
                filters: vec![],
            }))
            .await
            .unwrap();
        assert_eq!(count[0]["count"], json!(1));
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let backend = backend().await;
        let mut handle = backend.connect(ConnectionMode::Direct).await.unwrap();

        let err = handle
            .execute(&Query::Select(SelectQuery::new("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownTable(_)));

        let insert = Query::Insert(InsertQuery {
            table: "trips".into(),
            rows: vec![row(json!({"name": "Oslo"}))],
        });
        handle.execute(&insert).await.unwrap();
        let err = handle.execute(&insert).await.unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_registered_function() {
        let backend = backend().await;
        backend.register_function(
            "long_trips",
            "SELECT name FROM trips WHERE days >= ? ORDER BY name",
            &["min_days"],
        );
        let mut handle = backend.connect(ConnectionMode::Direct).await.unwrap();
        handle
            .execute(&Query::Insert(InsertQuery {
                table: "trips".into(),
                rows: vec![
                    row(json!({"name": "Lima", "days": 9})),
                    row(json!({"name": "Nice", "days": 1})),
                ],
            }))
            .await
            .unwrap();

        let rows = handle
            .execute(&Query::Function(FunctionCall::new(
                "long_trips",
                json!({"min_days": 5}),
            )))
            .await
            .unwrap();
        assert_eq!(rows, vec![row(json!({"name": "Lima"}))]);
    }
}
