use indexmap::IndexMap;
use serde_json::Value;

use crate::resolver::{ResolverId, RowFn, ValueTransform};

/// Key tagging a connection object that was built with no rows. Downstream
/// field merges treat such objects as absent rather than conflicting.
pub const EMPTY_CONNECTION_TAG: &str = "__emptyConnection";

/// One contributor to a named output field, evaluated during assembly.
/// Row sources read the resolver's own fetched row; connection sources read a
/// `FetchResult` and only appear on connection and page-info nodes.
pub(crate) enum FieldSource {
    Column { alias: String },
    ColumnWith { alias: String, transform: ValueTransform },
    Constant(Value),
    Derived(RowFn),
    /// Type name of the given node: static, or union branch scan.
    TypeName(ResolverId),
    /// Nested object built from the same row.
    Object(ResolverId),
    /// Scalar list projected from a child resolver's rows.
    ValueList { child: ResolverId, item: RowFn },
    /// Object list built from a child resolver's rows.
    ObjectList { child: ResolverId },
    /// Connection object built from a child resolver's fetch result.
    Connection(ResolverId),
    Edges(ResolverId),
    Nodes(ResolverId),
    PageInfo(ResolverId),
    TotalCount,
    /// Cursor of the current row, per the given query's cursor columns.
    Cursor(ResolverId),
    HasPreviousPage,
    HasNextPage,
    StartCursor(ResolverId),
    EndCursor(ResolverId),
}

impl FieldSource {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldSource::Column { .. } => "column",
            FieldSource::ColumnWith { .. } => "column",
            FieldSource::Constant(_) => "constant",
            FieldSource::Derived(_) => "derived",
            FieldSource::TypeName(_) => "type name",
            FieldSource::Object(_) => "object",
            FieldSource::ValueList { .. } => "list",
            FieldSource::ObjectList { .. } => "object list",
            FieldSource::Connection(_) => "connection",
            FieldSource::Edges(_) => "edges",
            FieldSource::Nodes(_) => "nodes",
            FieldSource::PageInfo(_) => "page info",
            FieldSource::TotalCount => "total count",
            FieldSource::Cursor(_) => "cursor",
            FieldSource::HasPreviousPage => "has previous page",
            FieldSource::HasNextPage => "has next page",
            FieldSource::StartCursor(_) => "start cursor",
            FieldSource::EndCursor(_) => "end cursor",
        }
    }
}

/// Accumulates named output fields in registration order. A field may have
/// several contributors; conflicts are detected at assembly time.
#[derive(Default)]
pub(crate) struct FieldBuilder {
    fields: IndexMap<String, Vec<FieldSource>>,
}

impl FieldBuilder {
    pub fn add(&mut self, field: &str, source: FieldSource) {
        self.fields.entry(field.to_string()).or_default().push(source);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<FieldSource>)> {
        self.fields.iter()
    }
}

/// True when the value is an object that is (or recursively contains nothing
/// but) empty-connection placeholders. An empty object qualifies.
pub(crate) fn only_empty_connections(value: &Value) -> bool {
    match value {
        Value::Object(fields) => {
            fields.contains_key(EMPTY_CONNECTION_TAG)
                || fields.values().all(only_empty_connections)
        }
        _ => false,
    }
}
