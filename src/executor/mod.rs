use async_trait::async_trait;

use crate::resolver::{ResolverError, Row};
use crate::sql::SelectQuery;

/// Runs a fully-built query and returns its rows. The engine never talks to
/// the store directly; swapping this out is how tests capture built queries
/// without running them.
#[async_trait]
pub trait RowExecutor: Send + Sync {
    async fn execute(&self, query: &SelectQuery) -> Result<Vec<Row>, ResolverError>;
}

pub mod memory;
pub use memory::*;

pub mod capture;
pub use capture::*;

/// Converts a JSON array of objects into rows, ignoring anything else.
pub fn rows_from_json(value: serde_json::Value) -> Vec<Row> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Object(fields) => Some(fields),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
