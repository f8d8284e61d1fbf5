use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::resolver::child_fetch::count_value;
use crate::resolver::{
    key_string, BuildContext, FetchEntry, FetchMap, NodeKind, ResolverError, ResolverId,
    ResolverTree, Row, SearchTransform,
};
use crate::sql::SqlCond;

impl ResolverTree {
    /// The query node behind the tree's root, whether the root is a plain
    /// query or a connection wrapper.
    pub(crate) fn root_query(&self) -> Result<ResolverId, ResolverError> {
        match &self.node(self.root).kind {
            NodeKind::Query(_) => Ok(self.root),
            NodeKind::Connection(state) => Ok(state.query),
            _ => Err(ResolverError::WrongResolverKind { expected: "root query" }),
        }
    }

    /// Executes the root query (`limit + 1` over-fetch, optional count query)
    /// and recursively fetches every registered child resolver, all siblings
    /// concurrently.
    pub async fn fetch(&self) -> Result<FetchMap, ResolverError> {
        let root = self.root_query()?;
        let state = self.query_state(root)?;
        let mut query = state.build_data_query(state.new_base_query())?;
        if state.lookup {
            query.limit = Some(1);
        } else if let Some(limit) = state.get_limit()? {
            query.limit = Some(limit + 1);
        }
        let rows = self.executor.execute(&query).await?;
        debug!(rows = rows.len(), "fetched root rows");
        let rows = state.filter_fetch(rows);
        let mut result = state.build_fetch_result(rows)?;
        if state.need_total_count {
            if result.has_next_page {
                let count_query = state.build_total_count_query();
                let count_rows = self.executor.execute(&count_query).await?;
                result.total_count =
                    Some(count_value(count_rows.first().and_then(|row| row.get("total_count"))));
            } else {
                result.total_count = Some(result.rows.len() as u64);
            }
        }

        let parent_rows = result.rows.clone();
        let mut map = FetchMap::default();
        map.insert(root, FetchEntry::Single(result));
        map.extend(self.fetch_children(root, &parent_rows).await?);
        Ok(map)
    }

    /// Fetches and assembles one result object per root row.
    pub async fn execute(&self) -> Result<Vec<Value>, ResolverError> {
        let map = self.fetch().await?;
        let root = self.root_query()?;
        let result = map.result_for(root, None).ok_or(ResolverError::MissingFetchResult)?;
        let mut cx = BuildContext { fetch: &map, parent_rows: HashMap::new() };
        let mut objects = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            cx.parent_rows.insert(root, row.clone());
            objects.push(self.build_object_value(root, row, &mut cx)?);
        }
        Ok(objects)
    }

    /// Single-object lookup: `limit 1`, no over-fetch.
    pub async fn execute_lookup(&mut self) -> Result<Option<Value>, ResolverError> {
        let root = self.root_query()?;
        self.query_state_mut(root)?.lookup = true;
        let mut objects = self.execute().await?;
        Ok(if objects.is_empty() { None } else { Some(objects.remove(0)) })
    }

    /// Fetches and assembles a root connection object.
    pub async fn execute_connection(&self) -> Result<Value, ResolverError> {
        let conn = self.root;
        self.connection_state(conn)?;
        let map = self.fetch().await?;
        self.connection_from_map(conn, &map)
    }

    /// Alternate entry path seeding the row set from an externally supplied,
    /// already-ordered identifier list (e.g. search-engine results) instead
    /// of SQL ordering. Page boundaries and child fetches work as usual; the
    /// total count is the caller's.
    pub async fn execute_connection_from_search(
        &mut self,
        id_column: &str,
        ids: Vec<Value>,
        total_count: Option<u64>,
        transform: Option<SearchTransform>,
    ) -> Result<Value, ResolverError> {
        let conn = self.root;
        self.connection_state(conn)?;
        let root = self.root_query()?;
        let id_alias = self.add_select_column(root, id_column)?;

        let state = self.query_state(root)?;
        let mut query = state.build_search_query(state.new_base_query());
        let qualified = format!("{}.{id_column}", state.base_alias);
        query.conds.push(SqlCond::In { column: qualified, values: ids.clone() });
        let rows = self.executor.execute(&query).await?;
        debug!(rows = rows.len(), ids = ids.len(), "fetched search-seeded rows");

        let mut by_id: HashMap<String, Row> = rows
            .into_iter()
            .map(|row| {
                let key = key_string(&[row.get(&id_alias).cloned().unwrap_or(Value::Null)]);
                (key, row)
            })
            .collect();
        let mut ordered = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(row) = by_id.remove(&key_string(std::slice::from_ref(id))) {
                match &transform {
                    Some(transform) => ordered.push(transform(row, id)),
                    None => ordered.push(row),
                }
            }
        }

        let state = self.query_state(root)?;
        let ordered = state.filter_fetch(ordered);
        let mut result = state.build_fetch_result(ordered)?;
        if state.need_total_count {
            result.total_count = total_count.or(Some(result.rows.len() as u64));
        }

        let parent_rows = result.rows.clone();
        let mut map = FetchMap::default();
        map.insert(root, FetchEntry::Single(result));
        map.extend(self.fetch_children(root, &parent_rows).await?);
        self.connection_from_map(conn, &map)
    }

    fn connection_from_map(&self, conn: ResolverId, map: &FetchMap) -> Result<Value, ResolverError> {
        let query = self.root_query()?;
        let result = map.result_for(query, None).ok_or(ResolverError::MissingFetchResult)?;
        let mut cx = BuildContext { fetch: map, parent_rows: HashMap::new() };
        self.build_connection_value(conn, result, &mut cx)
    }
}
