use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::executor::{rows_from_json, RowExecutor};
use crate::resolver::{ResolverError, Row};
use crate::sql::{SelectExpr, SelectItem, SelectQuery, SqlCond, TableRef};

/// Evaluates built queries against in-memory JSON tables: scans, left joins,
/// conditions, ordering with nulls lowest, per-partition limits, and count
/// queries. Raw SQL fragments are the one thing it refuses.
#[derive(Default)]
pub struct MemoryExecutor {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON array of objects as the named table's rows.
    pub fn load(&self, table: &str, rows: Value) {
        self.tables.write().unwrap().insert(table.to_string(), rows_from_json(rows));
    }

    fn run(&self, query: &SelectQuery) -> Result<Vec<Row>, ResolverError> {
        let tables = self.tables.read().unwrap();

        // base scan, keys qualified as "alias.column"
        let base = query
            .base
            .as_ref()
            .ok_or_else(|| ResolverError::store("query has no base table"))?;
        let base_alias = query.base_alias.clone().unwrap_or_else(|| base.name().to_string());
        let mut env_rows = self.scan(&tables, base, &base_alias)?;

        // left joins, in registration order
        for join in &query.joins {
            let right_rows = self.scan(&tables, &join.table, &join.alias)?;
            let mut joined = Vec::new();
            for left in env_rows {
                let mut matched = false;
                for right in &right_rows {
                    let mut candidate = left.clone();
                    for (key, value) in right {
                        candidate.insert(key.clone(), value.clone());
                    }
                    let on_matches = join.on.iter().all(|(to, from)| {
                        let to_value = candidate.get(to).cloned().unwrap_or(Value::Null);
                        let from_value = candidate.get(from).cloned().unwrap_or(Value::Null);
                        !to_value.is_null() && values_equal(&to_value, &from_value)
                    });
                    let restrictions_match = join
                        .restrictions
                        .iter()
                        .map(|(qualifier, restriction)| restriction.to_cond(qualifier))
                        .try_fold(true, |acc, cond| {
                            Ok::<bool, ResolverError>(acc && eval_cond(&candidate, &query.selects, &cond)?)
                        })?;
                    if on_matches && restrictions_match {
                        matched = true;
                        joined.push(candidate);
                    }
                }
                if !matched {
                    joined.push(left);
                }
            }
            env_rows = joined;
        }

        // where
        let mut filtered = Vec::with_capacity(env_rows.len());
        for env in env_rows {
            let mut keep = true;
            for cond in &query.conds {
                if !eval_cond(&env, &query.selects, cond)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                filtered.push(env);
            }
        }
        let mut env_rows = filtered;

        // count queries never page
        if let Some(count_alias) = &query.count_alias {
            return Ok(self.count_rows(&env_rows, query, count_alias));
        }

        // order by select output names
        if !query.order_by.is_empty() {
            let mut keyed: Vec<(Vec<Value>, Row)> = Vec::with_capacity(env_rows.len());
            for env in env_rows {
                let mut keys = Vec::with_capacity(query.order_by.len());
                for order in &query.order_by {
                    keys.push(resolve_name(&env, &query.selects, &order.name)?);
                }
                keyed.push((keys, env));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, order) in query.order_by.iter().enumerate() {
                    let ord = cmp_values(&a[i], &b[i]);
                    let ord = if order.descending { ord.reverse() } else { ord };
                    if !ord.is_eq() {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            env_rows = keyed.into_iter().map(|(_, env)| env).collect();
        }

        // windowed per-partition limit, in current sort order
        if let Some(window) = &query.partition_limit {
            let mut counts: HashMap<String, u64> = HashMap::new();
            env_rows.retain(|env| {
                let key: Vec<Value> = window
                    .partition_by
                    .iter()
                    .map(|column| env.get(column).cloned().unwrap_or(Value::Null))
                    .collect();
                let seen = counts.entry(serde_json::to_string(&key).unwrap()).or_insert(0);
                *seen += 1;
                *seen <= window.limit
            });
        }

        if let Some(limit) = query.limit {
            env_rows.truncate(limit as usize);
        }

        // projection
        let mut out = Vec::with_capacity(env_rows.len());
        let mut seen = HashSet::new();
        for env in &env_rows {
            let mut row = Row::new();
            for item in &query.selects {
                row.insert(item.output_name().to_string(), select_value(env, item)?);
            }
            if query.distinct {
                let key = serde_json::to_string(&row).unwrap();
                if !seen.insert(key) {
                    continue;
                }
            }
            out.push(row);
        }
        Ok(out)
    }

    fn scan(
        &self,
        tables: &HashMap<String, Vec<Row>>,
        table: &TableRef,
        alias: &str,
    ) -> Result<Vec<Row>, ResolverError> {
        let rows = match table {
            TableRef::Name(name) => tables
                .get(name)
                .cloned()
                .ok_or_else(|| ResolverError::store(format!("unknown table \"{name}\"")))?,
            TableRef::Derived { query, .. } => self.run(query)?,
        };
        Ok(rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(key, value)| (format!("{alias}.{key}"), value))
                    .collect()
            })
            .collect())
    }

    fn count_rows(&self, env_rows: &[Row], query: &SelectQuery, count_alias: &str) -> Vec<Row> {
        if query.group_by.is_empty() {
            let mut row = Row::new();
            row.insert(count_alias.to_string(), Value::from(env_rows.len() as u64));
            return vec![row];
        }
        let mut groups: IndexMap<String, (Row, u64)> = IndexMap::new();
        for env in env_rows {
            let key: Vec<Value> = query
                .group_by
                .iter()
                .map(|column| env.get(column).cloned().unwrap_or(Value::Null))
                .collect();
            let entry = groups
                .entry(serde_json::to_string(&key).unwrap())
                .or_insert_with(|| (env.clone(), 0));
            entry.1 += 1;
        }
        groups
            .into_values()
            .map(|(env, count)| {
                let mut row = Row::new();
                for item in &query.selects {
                    row.insert(
                        item.output_name().to_string(),
                        select_value(&env, item).unwrap_or(Value::Null),
                    );
                }
                row.insert(count_alias.to_string(), Value::from(count));
                row
            })
            .collect()
    }
}

#[async_trait]
impl RowExecutor for MemoryExecutor {
    async fn execute(&self, query: &SelectQuery) -> Result<Vec<Row>, ResolverError> {
        let (sql, bindings) = query.to_sql();
        debug!(%sql, bindings = bindings.len(), "executing in-memory query");
        self.run(query)
    }
}

fn select_value(env: &Row, item: &SelectItem) -> Result<Value, ResolverError> {
    match &item.expr {
        SelectExpr::Column { table, column } => {
            Ok(env.get(&format!("{table}.{column}")).cloned().unwrap_or(Value::Null))
        }
        SelectExpr::Coalesce(columns) => Ok(columns
            .iter()
            .map(|(table, column)| env.get(&format!("{table}.{column}")).cloned().unwrap_or(Value::Null))
            .find(|value| !value.is_null())
            .unwrap_or(Value::Null)),
        SelectExpr::Raw(expr) => Err(ResolverError::store(format!(
            "memory executor cannot evaluate raw SQL: {}",
            expr.sql
        ))),
    }
}

/// A column reference in a condition: an `alias.column` qualified name, or a
/// select output name.
fn resolve_name(env: &Row, selects: &[SelectItem], name: &str) -> Result<Value, ResolverError> {
    for item in selects {
        if item.output_name() == name {
            return select_value(env, item);
        }
    }
    Ok(env.get(name).cloned().unwrap_or(Value::Null))
}

fn eval_cond(env: &Row, selects: &[SelectItem], cond: &SqlCond) -> Result<bool, ResolverError> {
    match cond {
        SqlCond::Eq { column, value } => {
            let actual = resolve_name(env, selects, column)?;
            if value.is_null() {
                Ok(actual.is_null())
            } else {
                Ok(values_equal(&actual, value))
            }
        }
        SqlCond::Cmp { column, op, value } => {
            let actual = resolve_name(env, selects, column)?;
            if actual.is_null() || value.is_null() {
                return Ok(false);
            }
            let ord = cmp_values(&actual, value);
            Ok(match op.as_str() {
                ">" => ord.is_gt(),
                "<" => ord.is_lt(),
                ">=" => ord.is_ge(),
                "<=" => ord.is_le(),
                "=" => ord.is_eq(),
                "!=" | "<>" => !ord.is_eq(),
                other => {
                    return Err(ResolverError::store(format!("unsupported operator \"{other}\"")));
                }
            })
        }
        SqlCond::NotNull { column } => Ok(!resolve_name(env, selects, column)?.is_null()),
        SqlCond::In { column, values } => {
            let actual = resolve_name(env, selects, column)?;
            Ok(values.iter().any(|value| values_equal(&actual, value)))
        }
        SqlCond::InTuples { columns, tuples } => {
            let mut actual = Vec::with_capacity(columns.len());
            for column in columns {
                actual.push(resolve_name(env, selects, column)?);
            }
            Ok(tuples.iter().any(|tuple| {
                tuple.len() == actual.len()
                    && tuple.iter().zip(&actual).all(|(a, b)| values_equal(a, b))
            }))
        }
        SqlCond::And(conds) => {
            for cond in conds {
                if !eval_cond(env, selects, cond)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        SqlCond::Or(conds) => {
            for cond in conds {
                if eval_cond(env, selects, cond)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        SqlCond::Never => Ok(false),
        SqlCond::Raw(expr) => Err(ResolverError::store(format!(
            "memory executor cannot evaluate raw SQL: {}",
            expr.sql
        ))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    cmp_values(a, b).is_eq()
}

/// Total order with nulls lowest, matching the cursor predicate's "nothing
/// sorts before null" rule.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
    use Value::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (Number(x), Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (String(x), String(y)) => x.cmp(y),
        (x, y) => {
            let rank = |v: &Value| match v {
                Null => 0u8,
                Bool(_) => 1,
                Number(_) => 2,
                String(_) => 3,
                Array(_) => 4,
                Object(_) => 5,
            };
            match rank(x).cmp(&rank(y)) {
                Ordering::Equal => {
                    let sx = serde_json::to_string(x).unwrap();
                    let sy = serde_json::to_string(y).unwrap();
                    sx.cmp(&sy)
                }
                other => other,
            }
        }
    }
}
