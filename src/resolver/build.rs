use std::collections::HashMap;

use serde_json::Value;

use crate::resolver::{
    encode_cursor, only_empty_connections, FetchMap, FetchResult, FieldSource, NodeKind,
    ResolverError, ResolverId, ResolverTree, Row, TypeNameSource, EMPTY_CONNECTION_TAG,
};

/// Assembly-phase context: the fetch map plus the ancestor rows registered as
/// result rows are iterated, so back-reference views can read them.
pub(crate) struct BuildContext<'a> {
    pub fetch: &'a FetchMap,
    pub parent_rows: HashMap<ResolverId, Row>,
}

impl ResolverTree {
    /// Builds one result object for a node from its row. Delegating views
    /// with a presence-test column build `null` when the test column is null;
    /// back-reference views substitute the ancestor query's current row.
    pub(crate) fn build_object_value(
        &self,
        id: ResolverId,
        row: &Row,
        cx: &mut BuildContext<'_>,
    ) -> Result<Value, ResolverError> {
        if let NodeKind::Delegating(state) = &self.node(id).kind {
            if state.from_parent_row {
                let parent_row = cx.parent_rows.get(&state.query).cloned().unwrap_or_default();
                return self.build_fields(id, &parent_row, cx);
            }
            if let Some(test_column) = &state.test_column {
                if row.get(test_column).map_or(true, Value::is_null) {
                    return Ok(Value::Null);
                }
            }
        }
        self.build_fields(id, row, cx)
    }

    fn build_fields(&self, id: ResolverId, row: &Row, cx: &mut BuildContext<'_>) -> Result<Value, ResolverError> {
        let mut result = Row::new();
        for (field, sources) in self.node(id).fields.iter() {
            let mut chosen: Option<(Value, &'static str)> = None;
            for source in sources {
                let value = self.eval_row_source(source, row, cx)?;
                merge_field_value(field, &mut chosen, value, source.describe())?;
            }
            result.insert(field.clone(), chosen.map(|(value, _)| value).unwrap_or(Value::Null));
        }
        Ok(Value::Object(result))
    }

    fn eval_row_source(
        &self,
        source: &FieldSource,
        row: &Row,
        cx: &mut BuildContext<'_>,
    ) -> Result<Value, ResolverError> {
        let fetch = cx.fetch;
        match source {
            FieldSource::Column { alias } => {
                Ok(row.get(alias).cloned().unwrap_or(Value::Null))
            }
            FieldSource::ColumnWith { alias, transform } => {
                Ok(transform(row.get(alias).unwrap_or(&Value::Null), row))
            }
            FieldSource::Constant(value) => Ok(value.clone()),
            FieldSource::Derived(func) => Ok(func(row)),
            FieldSource::TypeName(node) => Ok(self.type_name_value(*node, row)),
            FieldSource::Object(target) => self.build_object_value(*target, row, cx),
            FieldSource::ValueList { child, item } => {
                let data = fetch
                    .result_for(*child, Some(row))
                    .ok_or(ResolverError::MissingFetchResult)?;
                Ok(Value::Array(data.rows.iter().map(|row| item(row)).collect()))
            }
            FieldSource::ObjectList { child } => {
                let data = fetch
                    .result_for(*child, Some(row))
                    .ok_or(ResolverError::MissingFetchResult)?;
                let mut objects = Vec::with_capacity(data.rows.len());
                for child_row in &data.rows {
                    cx.parent_rows.insert(*child, child_row.clone());
                    objects.push(self.build_object_value(*child, child_row, cx)?);
                }
                Ok(Value::Array(objects))
            }
            FieldSource::Connection(conn) => {
                let query = self.connection_state(*conn)?.query;
                let data = fetch
                    .result_for(query, Some(row))
                    .ok_or(ResolverError::MissingFetchResult)?;
                let mut value = self.build_connection_value(*conn, data, cx)?;
                if data.rows.is_empty() {
                    if let Value::Object(fields) = &mut value {
                        fields.insert(EMPTY_CONNECTION_TAG.to_string(), Value::Bool(true));
                    }
                }
                Ok(value)
            }
            FieldSource::Cursor(query) => Ok(Value::String(self.row_cursor(*query, row)?)),
            _ => Err(ResolverError::WrongResolverKind { expected: "connection" }),
        }
    }

    /// Builds a connection-shaped object (edges, nodes, pageInfo, totalCount)
    /// from a fetch result.
    pub(crate) fn build_connection_value(
        &self,
        id: ResolverId,
        data: &FetchResult,
        cx: &mut BuildContext<'_>,
    ) -> Result<Value, ResolverError> {
        let mut result = Row::new();
        for (field, sources) in self.node(id).fields.iter() {
            let mut chosen: Option<(Value, &'static str)> = None;
            for source in sources {
                let value = self.eval_connection_source(source, data, cx)?;
                merge_field_value(field, &mut chosen, value, source.describe())?;
            }
            result.insert(field.clone(), chosen.map(|(value, _)| value).unwrap_or(Value::Null));
        }
        Ok(Value::Object(result))
    }

    fn eval_connection_source(
        &self,
        source: &FieldSource,
        data: &FetchResult,
        cx: &mut BuildContext<'_>,
    ) -> Result<Value, ResolverError> {
        match source {
            FieldSource::Constant(value) => Ok(value.clone()),
            FieldSource::Edges(conn) => {
                let state = self.connection_state(*conn)?;
                let (query, edges) = (state.query, state.edges);
                let mut values = Vec::with_capacity(data.rows.len());
                for row in &data.rows {
                    cx.parent_rows.insert(query, row.clone());
                    values.push(self.build_object_value(edges, row, cx)?);
                }
                Ok(Value::Array(values))
            }
            FieldSource::Nodes(conn) => {
                let query = self.connection_state(*conn)?.query;
                let mut values = Vec::with_capacity(data.rows.len());
                for row in &data.rows {
                    cx.parent_rows.insert(query, row.clone());
                    values.push(self.build_object_value(query, row, cx)?);
                }
                Ok(Value::Array(values))
            }
            FieldSource::PageInfo(page_info) => self.build_connection_value(*page_info, data, cx),
            FieldSource::TotalCount => Ok(Value::from(data.total_count.unwrap_or(0))),
            FieldSource::HasPreviousPage => Ok(Value::Bool(data.has_previous_page)),
            FieldSource::HasNextPage => Ok(Value::Bool(data.has_next_page)),
            FieldSource::StartCursor(query) => match data.rows.first() {
                Some(row) => Ok(Value::String(self.row_cursor(*query, row)?)),
                None => Ok(data.after_cursor.clone().map(Value::String).unwrap_or(Value::Null)),
            },
            FieldSource::EndCursor(query) => match data.rows.last() {
                Some(row) => Ok(Value::String(self.row_cursor(*query, row)?)),
                None => Ok(data.before_cursor.clone().map(Value::String).unwrap_or(Value::Null)),
            },
            _ => Err(ResolverError::WrongResolverKind { expected: "row" }),
        }
    }

    /// The row's opaque cursor, from the query's cursor-column values.
    pub(crate) fn row_cursor(&self, query: ResolverId, row: &Row) -> Result<String, ResolverError> {
        Ok(encode_cursor(row, &self.query_state(query)?.cursor_columns))
    }

    fn type_name_value(&self, id: ResolverId, row: &Row) -> Value {
        match &self.node(id).type_name {
            Some(TypeNameSource::Static(name)) => Value::String(name.clone()),
            Some(TypeNameSource::Branches(branches)) => {
                // last matching branch wins, so a supertype table joined first
                // is overridden by a subtype table joined later
                let mut result = Value::Null;
                for branch in branches {
                    if row.get(&branch.test_column).is_some_and(|v| !v.is_null()) {
                        result = Value::String(branch.type_name.clone());
                    }
                }
                result
            }
            None => Value::Null,
        }
    }
}

/// First non-null contributor wins; a later non-null contributor must be
/// deep-equal unless one side is an empty-connection placeholder.
fn merge_field_value(
    field: &str,
    chosen: &mut Option<(Value, &'static str)>,
    value: Value,
    source: &'static str,
) -> Result<(), ResolverError> {
    if value.is_null() {
        return Ok(());
    }
    match chosen {
        None => {
            *chosen = Some((value, source));
        }
        Some((current, current_source)) => {
            if only_empty_connections(current) {
                *chosen = Some((value, source));
            } else if *current != value && !only_empty_connections(&value) {
                return Err(ResolverError::ConflictingFieldValues {
                    field: field.to_string(),
                    detail: format!(
                        "{current_source} source produced {current}, {source} source produced {value}"
                    ),
                });
            }
        }
    }
    Ok(())
}
