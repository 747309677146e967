//! Structured query descriptions handed to the storage backend.
//!
//! The access layer never builds backend-specific text itself; it describes
//! what it wants with these types and lets each `StorageConnection` translate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::mode::OperationKind;
use super::vector::DistanceMetric;

/// A result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Value must be a JSON array; matches when the column equals any element.
    In,
    /// SQL-style pattern with `%` and `_` wildcards.
    Like,
    /// Matches when the column is absent or null. The value is ignored.
    IsNull,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Like => "like",
            Self::IsNull => "is_null",
        }
    }
}

/// A single column predicate. Filters in a list are combined with AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Neq, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Gt, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Gte, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Lt, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Lte, value)
    }

    pub fn one_of(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(column, FilterOp::In, Value::Array(values))
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Like, Value::String(pattern.into()))
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, FilterOp::IsNull, Value::Null)
    }

    /// Evaluate this predicate against a row.
    ///
    /// A missing column behaves like SQL NULL: only `IsNull` and `Neq`
    /// against a non-null value match.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::IsNull => actual.is_null(),
            FilterOp::Eq => !actual.is_null() && values_equal(actual, &self.value),
            FilterOp::Neq => {
                if actual.is_null() {
                    !self.value.is_null()
                } else {
                    !values_equal(actual, &self.value)
                }
            }
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => match &self.value {
                Value::Array(options) => {
                    !actual.is_null() && options.iter().any(|v| values_equal(actual, v))
                }
                _ => false,
            },
            FilterOp::Like => match (actual, &self.value) {
                (Value::String(text), Value::String(pattern)) => like_match(text, pattern),
                _ => false,
            },
        }
    }
}

/// Ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Projection, filters, ordering and pagination over one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectQuery {
    pub table: String,
    /// Projected columns; empty means all columns.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertQuery {
    pub table: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateQuery {
    pub table: String,
    pub values: Row,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteQuery {
    pub table: String,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertQuery {
    pub table: String,
    pub rows: Vec<Row>,
    /// Columns whose values identify an existing row.
    pub conflict_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountQuery {
    pub table: String,
    pub filters: Vec<Filter>,
}

/// k-nearest-neighbour search over a vector column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchQuery {
    pub table: String,
    pub vector_column: String,
    pub query_vector: Vec<f64>,
    pub k: usize,
    /// Minimum similarity a row must reach.
    pub similarity_threshold: Option<f64>,
    /// Equality filters applied before ranking.
    pub filters: Vec<Filter>,
    pub metric: DistanceMetric,
}

impl VectorSearchQuery {
    pub fn new(
        table: impl Into<String>,
        vector_column: impl Into<String>,
        query_vector: Vec<f64>,
        k: usize,
    ) -> Self {
        Self {
            table: table.into(),
            vector_column: vector_column.into(),
            query_vector,
            k,
            similarity_threshold: None,
            filters: Vec::new(),
            metric: DistanceMetric::Cosine,
        }
    }

    pub fn with_threshold(mut self, similarity: f64) -> Self {
        self.similarity_threshold = Some(similarity);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Score candidate rows and keep the `k` nearest.
    ///
    /// Rows failing a filter, lacking a readable vector of the query's
    /// dimension, or below the similarity threshold are dropped. Survivors
    /// gain `distance` and `similarity` fields and come back in
    /// non-decreasing distance order.
    pub fn rank(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut scored: Vec<(f64, Row)> = rows
            .into_iter()
            .filter(|row| self.filters.iter().all(|f| f.matches(row)))
            .filter_map(|row| {
                let stored = super::vector::parse_vector(row.get(&self.vector_column)?)?;
                let distance = self.metric.distance(&self.query_vector, &stored)?;
                Some((distance, row))
            })
            .filter(|(distance, _)| {
                self.similarity_threshold
                    .map_or(true, |floor| self.metric.distance_to_similarity(*distance) >= floor)
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(self.k);
        scored
            .into_iter()
            .map(|(distance, mut row)| {
                row.insert("distance".into(), Value::from(distance));
                row.insert(
                    "similarity".into(),
                    Value::from(self.metric.distance_to_similarity(distance)),
                );
                row
            })
            .collect()
    }
}

/// Remote procedure call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub params: Value,
    /// Tables the function mutates; their cache entries are invalidated on success.
    #[serde(default)]
    pub invalidates: Vec<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
            invalidates: Vec::new(),
        }
    }

    pub fn invalidating(mut self, table: impl Into<String>) -> Self {
        self.invalidates.push(table.into());
        self
    }
}

/// A request for the storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    Select(SelectQuery),
    Count(CountQuery),
    VectorSearch(VectorSearchQuery),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    Upsert(UpsertQuery),
    Function(FunctionCall),
    Raw { statement: String },
    /// Cheapest possible round-trip used for health checks.
    Probe,
}

impl Query {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Select(_) => OperationKind::Select,
            Self::Count(_) => OperationKind::Count,
            Self::VectorSearch(_) => OperationKind::VectorSearch,
            Self::Insert(_) => OperationKind::Insert,
            Self::Update(_) => OperationKind::Update,
            Self::Delete(_) => OperationKind::Delete,
            Self::Upsert(_) => OperationKind::Upsert,
            Self::Function(_) => OperationKind::Function,
            Self::Raw { .. } => OperationKind::Raw,
            Self::Probe => OperationKind::Probe,
        }
    }

    /// Table the query targets; function calls report their name.
    pub fn target(&self) -> &str {
        match self {
            Self::Select(q) => &q.table,
            Self::Count(q) => &q.table,
            Self::VectorSearch(q) => &q.table,
            Self::Insert(q) => &q.table,
            Self::Update(q) => &q.table,
            Self::Delete(q) => &q.table,
            Self::Upsert(q) => &q.table,
            Self::Function(f) => &f.name,
            Self::Raw { .. } => "raw",
            Self::Probe => "probe",
        }
    }
}

/// Structural equality with numeric normalization (`1` equals `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering between two scalar JSON values of the same family.
///
/// Returns `None` for nulls and for values that cannot be compared.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Ordering used for `ORDER BY`: nulls sort first, incomparable values tie.
pub fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// SQL `LIKE` matching with `%` (any run) and `_` (any single char).
///
/// Case-insensitive for ASCII letters only, as in SQLite.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p].eq_ignore_ascii_case(&text[t])) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}
