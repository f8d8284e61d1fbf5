use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One fetched row, keyed by select output name.
pub type Row = serde_json::Map<String, Value>;

/// In-process filter applied to fetched rows before page boundaries are
/// computed. Registering one disables SQL-side per-group limiting, since the
/// filter runs at a later stage.
pub type FetchFilter = Arc<dyn Fn(Vec<Row>) -> Vec<Row> + Send + Sync>;

/// Transforms a selected column value; receives the full row as context.
pub type ValueTransform = Arc<dyn Fn(&Value, &Row) -> Value + Send + Sync>;

/// Derives a field value from a row.
pub type RowFn = Arc<dyn Fn(&Row) -> Value + Send + Sync>;

/// Rewrites a search-seeded row given the identifier that matched it.
pub type SearchTransform = Arc<dyn Fn(Row, &Value) -> Row + Send + Sync>;

/// Stable index of a resolver node within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolverId(pub(crate) usize);

/// Relay-style pagination arguments. `first` takes precedence when both
/// `first` and `last` are given; the two combine to mean "first page of size
/// `first`, further truncated to its last `last` rows".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionArgs {
    pub first: Option<i64>,
    pub after: Option<String>,
    pub last: Option<i64>,
    pub before: Option<String>,
}

impl ConnectionArgs {
    pub fn first(n: i64) -> Self {
        Self { first: Some(n), ..Self::default() }
    }

    pub fn last(n: i64) -> Self {
        Self { last: Some(n), ..Self::default() }
    }

    pub fn with_after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn with_before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

/// Server-side page bounds and initial shared data. `None` limits mean
/// unbounded, which is how plain (non-connection) list fields are configured.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub default_limit: Option<u64>,
    pub max_limit: Option<u64>,
    pub initial_data: Row,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            default_limit: Some(20),
            max_limit: Some(100),
            initial_data: Row::new(),
        }
    }
}

impl ResolverOptions {
    pub(crate) fn unlimited() -> Self {
        Self { default_limit: None, max_limit: None, initial_data: Row::new() }
    }
}

/// Canonical string for a join-key tuple, used to group child rows by parent.
pub(crate) fn key_string(values: &[Value]) -> String {
    // Value serialization is infallible and deterministic for arrays.
    serde_json::to_string(values).unwrap()
}

pub(crate) fn row_keys(row: &Row, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}
