use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::executor::{rows_from_json, RowExecutor};
use crate::resolver::{ResolverError, Row};
use crate::sql::SelectQuery;

/// Records every built query and answers from a queue of canned row sets
/// (empty once the queue runs dry). Lets tests assert on generated SQL and
/// round-trip counts without a store.
#[derive(Default)]
pub struct CapturingExecutor {
    queries: Mutex<Vec<(String, Vec<Value>)>>,
    responses: Mutex<VecDeque<Vec<Row>>>,
}

impl CapturingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the rows returned by the next executed query.
    pub fn queue(&self, rows: Value) {
        self.responses.lock().unwrap().push_back(rows_from_json(rows));
    }

    /// Every executed query so far, as `(sql, bindings)`.
    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl RowExecutor for CapturingExecutor {
    async fn execute(&self, query: &SelectQuery) -> Result<Vec<Row>, ResolverError> {
        let (sql, bindings) = query.to_sql();
        debug!(%sql, "captured query");
        self.queries.lock().unwrap().push((sql, bindings));
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }
}
