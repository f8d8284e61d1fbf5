use serde_json::Value;

use crate::sql::{ColumnRestriction, SqlCond, SqlExpr};

pub const PARTITION_ROW_COLUMN: &str = "partition_row";
pub const WINDOW_SUBQUERY_ALIAS: &str = "windowed";

/// A named table or a named derived table (subquery).
#[derive(Debug, Clone)]
pub enum TableRef {
    Name(String),
    Derived { name: String, query: Box<SelectQuery> },
}

impl TableRef {
    pub fn name(&self) -> &str {
        match self {
            TableRef::Name(name) => name,
            TableRef::Derived { name, .. } => name,
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, TableRef::Derived { .. })
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::Name(name.to_string())
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        TableRef::Name(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectExpr {
    Column { table: String, column: String },
    /// `coalesce(t1.c, t2.c, ...)` over alias-qualified columns. Structured so
    /// in-process executors can evaluate it.
    Coalesce(Vec<(String, String)>),
    Raw(SqlExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SelectExpr,
    pub alias: Option<String>,
}

impl SelectItem {
    /// Name the value is keyed by in result rows.
    pub fn output_name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        match &self.expr {
            SelectExpr::Column { column, .. } => column,
            _ => "expr",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub name: String,
    pub descending: bool,
}

/// Per-group row limit: wraps the query in a `row_number() over (partition by
/// ...)` subquery so one round trip returns up to `limit` rows per group.
#[derive(Debug, Clone)]
pub struct PartitionLimit {
    pub partition_by: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: TableRef,
    pub alias: String,
    /// Equality pairs, each `(to_qualified, from_qualified)`.
    pub on: Vec<(String, String)>,
    /// Extra restrictions, each pre-paired with its qualifier.
    pub restrictions: Vec<(String, ColumnRestriction)>,
}

/// The built query handed to a row executor. Renders to placeholder SQL with
/// positional bindings; in-process executors evaluate the structure directly.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub base: Option<TableRef>,
    pub base_alias: Option<String>,
    pub distinct: bool,
    pub selects: Vec<SelectItem>,
    pub joins: Vec<JoinClause>,
    pub conds: Vec<SqlCond>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub partition_limit: Option<PartitionLimit>,
    /// `count(*) as <alias>` appended to the select list.
    pub count_alias: Option<String>,
    pub group_by: Vec<String>,
}

impl SelectQuery {
    pub fn new(base: TableRef) -> Self {
        Self { base: Some(base), ..Self::default() }
    }

    pub fn base_name(&self) -> &str {
        self.base.as_ref().map(TableRef::name).unwrap_or_default()
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut bindings = Vec::new();
        self.render(&mut sql, &mut bindings);
        (sql, bindings)
    }

    fn render(&self, sql: &mut String, bindings: &mut Vec<Value>) {
        if let Some(window) = &self.partition_limit {
            sql.push_str("select * from (");
            self.render_plain(sql, bindings, Some(window));
            sql.push_str(&format!(
                ") as {WINDOW_SUBQUERY_ALIAS} where {PARTITION_ROW_COLUMN} <= {}",
                window.limit
            ));
        } else {
            self.render_plain(sql, bindings, None);
        }
    }

    fn render_plain(&self, sql: &mut String, bindings: &mut Vec<Value>, window: Option<&PartitionLimit>) {
        sql.push_str(if self.distinct { "select distinct " } else { "select " });
        let mut first = true;
        for item in &self.selects {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            render_select_item(item, sql, bindings);
        }
        if let Some(alias) = &self.count_alias {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            sql.push_str(&format!("count(*) as {alias}"));
        }
        if let Some(w) = window {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            render_window(w, sql);
        }
        if first {
            sql.push('*');
        }

        sql.push_str(" from ");
        if let Some(base) = &self.base {
            render_table(base, self.base_alias.as_deref(), sql, bindings);
        }

        for join in &self.joins {
            sql.push_str(" left join ");
            render_table(&join.table, Some(&join.alias), sql, bindings);
            sql.push_str(" on ");
            let mut first_on = true;
            for (to, from) in &join.on {
                if !first_on {
                    sql.push_str(" and ");
                }
                first_on = false;
                sql.push_str(&format!("{to} = {from}"));
            }
            for (qualifier, restriction) in &join.restrictions {
                if !first_on {
                    sql.push_str(" and ");
                }
                first_on = false;
                restriction.to_cond(qualifier).render_grouped(sql, bindings);
            }
        }

        if !self.conds.is_empty() {
            sql.push_str(" where ");
            for (i, cond) in self.conds.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" and ");
                }
                cond.render_grouped(sql, bindings);
            }
        }

        if !self.group_by.is_empty() {
            sql.push_str(" group by ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" order by ");
            for (i, order) in self.order_by.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&order.name);
                if order.descending {
                    sql.push_str(" desc");
                }
            }
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" limit {limit}"));
        }
    }
}

fn render_table(table: &TableRef, alias: Option<&str>, sql: &mut String, bindings: &mut Vec<Value>) {
    match table {
        TableRef::Name(name) => {
            sql.push_str(name);
            if let Some(alias) = alias {
                if alias != name {
                    sql.push_str(&format!(" as {alias}"));
                }
            }
        }
        TableRef::Derived { name, query } => {
            sql.push('(');
            query.render(sql, bindings);
            sql.push_str(&format!(") as {}", alias.unwrap_or(name)));
        }
    }
}

fn render_select_item(item: &SelectItem, sql: &mut String, bindings: &mut Vec<Value>) {
    match &item.expr {
        SelectExpr::Column { table, column } => {
            sql.push_str(&format!("{table}.{column}"));
        }
        SelectExpr::Coalesce(columns) => {
            sql.push_str("coalesce(");
            for (i, (table, column)) in columns.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&format!("{table}.{column}"));
            }
            sql.push(')');
        }
        SelectExpr::Raw(expr) => {
            sql.push_str(&expr.sql);
            bindings.extend(expr.bindings.iter().cloned());
        }
    }
    if let Some(alias) = &item.alias {
        sql.push_str(&format!(" as {alias}"));
    }
}

fn render_window(window: &PartitionLimit, sql: &mut String) {
    sql.push_str("row_number() over (partition by ");
    sql.push_str(&window.partition_by.join(", "));
    if !window.order_by.is_empty() {
        sql.push_str(" order by ");
        for (i, order) in window.order_by.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&order.name);
            if order.descending {
                sql.push_str(" desc");
            }
        }
    }
    sql.push_str(&format!(") as {PARTITION_ROW_COLUMN}"));
}
