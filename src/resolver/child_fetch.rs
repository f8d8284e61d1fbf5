use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::resolver::{
    key_string, row_keys, FetchEntry, ResolverError, ResolverId, ResolverTree, Row,
};
use crate::sql::{SelectExpr, SelectItem, SqlCond};

impl ResolverTree {
    /// Fans out over every child resolver registered on `query`, awaiting all
    /// of them; the first error aborts the whole pending fetch subtree.
    pub(crate) async fn fetch_children(
        &self,
        query: ResolverId,
        parent_rows: &[Row],
    ) -> Result<Vec<(ResolverId, FetchEntry)>, ResolverError> {
        let children = self.query_state(query)?.children.clone();
        let fetches = children.into_iter().map(|child| self.fetch_child(child, parent_rows));
        let nested = try_join_all(fetches).await?;
        Ok(nested.into_iter().flatten().collect())
    }

    /// Batched child fetch: one query covering every distinct parent join-key
    /// tuple, grouped back by child-side key with per-group page boundaries.
    fn fetch_child<'a>(
        &'a self,
        child: ResolverId,
        parent_rows: &'a [Row],
    ) -> BoxFuture<'a, Result<Vec<(ResolverId, FetchEntry)>, ResolverError>> {
        async move {
            let state = self.query_state(child)?;
            let link = state
                .child_link
                .clone()
                .ok_or(ResolverError::WrongResolverKind { expected: "child query" })?;

            let parent_keys = distinct_row_keys(parent_rows, &link.from_selects);
            let all_rows = if parent_keys.is_empty() {
                Vec::new()
            } else {
                let to_table = link.join.to_table.name();
                let qualified: Vec<String> = link
                    .join
                    .to_columns
                    .iter()
                    .map(|column| format!("{to_table}.{column}"))
                    .collect();
                let mut query = state.new_base_query();
                query.conds.push(SqlCond::InTuples {
                    columns: qualified.clone(),
                    tuples: parent_keys.clone(),
                });
                for restriction in &link.join.to_restrictions {
                    query.conds.push(restriction.to_cond(to_table));
                }
                let mut query = state.build_data_query(query)?;
                state.apply_partition_limit(&mut query)?;
                self.executor.execute(&query).await?
            };
            debug!(resolver = child.0, rows = all_rows.len(), "fetched child rows");

            let mut grouped: IndexMap<String, (Vec<Value>, Vec<Row>)> = IndexMap::new();
            for row in &all_rows {
                let keys = row_keys(row, &link.to_selects);
                let entry = grouped.entry(key_string(&keys)).or_insert_with(|| (keys, Vec::new()));
                entry.1.push(row.clone());
            }

            let mut by_key = HashMap::new();
            let mut count_keys = Vec::new();
            for (key, (keys, rows)) in grouped {
                let filtered = state.filter_fetch(rows);
                let mut result = state.build_fetch_result(filtered)?;
                if state.need_total_count {
                    if result.has_next_page {
                        count_keys.push(keys);
                    } else {
                        result.total_count = Some(result.rows.len() as u64);
                    }
                }
                by_key.insert(key, result);
            }

            if !count_keys.is_empty() {
                let counts = self.fetch_group_counts(child, count_keys).await?;
                for row in counts {
                    let keys = row_keys(&row, &link.to_selects);
                    if let Some(result) = by_key.get_mut(&key_string(&keys)) {
                        result.total_count = Some(count_value(row.get("total_count")));
                    }
                }
            }

            let mut empty = state.build_fetch_result(Vec::new())?;
            empty.total_count = Some(0);
            let mut entries = vec![(
                child,
                FetchEntry::Keyed { key_columns: link.from_selects.clone(), by_key, empty },
            )];
            // grandchildren batch over the full fetched set, pre-truncation
            entries.extend(self.fetch_children(child, &all_rows).await?);
            Ok(entries)
        }
        .boxed()
    }

    /// One grouped count query for the parent groups that still have a next
    /// page; all other groups already know their count.
    async fn fetch_group_counts(
        &self,
        child: ResolverId,
        keys: Vec<Vec<Value>>,
    ) -> Result<Vec<Row>, ResolverError> {
        let state = self.query_state(child)?;
        let link = state
            .child_link
            .as_ref()
            .ok_or(ResolverError::WrongResolverKind { expected: "child query" })?;
        let to_table = link.join.to_table.name();
        let mut query = state.new_base_query();
        let mut qualified = Vec::with_capacity(link.join.to_columns.len());
        for (column, alias) in link.join.to_columns.iter().zip(&link.to_selects) {
            qualified.push(format!("{to_table}.{column}"));
            query.selects.push(SelectItem {
                expr: SelectExpr::Column { table: to_table.to_string(), column: column.clone() },
                alias: Some(alias.clone()),
            });
        }
        query.conds.push(SqlCond::InTuples { columns: qualified.clone(), tuples: keys });
        query.group_by = qualified;
        query.count_alias = Some("total_count".to_string());
        self.executor.execute(&query).await
    }
}

/// Distinct join-key tuples, skipping parents with any null key component.
fn distinct_row_keys(rows: &[Row], columns: &[String]) -> Vec<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for row in rows {
        if columns.iter().any(|column| row.get(column).map_or(true, Value::is_null)) {
            continue;
        }
        let tuple = row_keys(row, columns);
        if seen.insert(key_string(&tuple)) {
            keys.push(tuple);
        }
    }
    keys
}

pub(crate) fn count_value(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => {
            n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)).unwrap_or(0)
        }
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
