use serde_json::Value;

/// A raw SQL fragment with positional `?` bindings, for host-supplied
/// expressions the planner does not need to understand.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExpr {
    pub sql: String,
    pub bindings: Vec<Value>,
}

impl SqlExpr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), bindings: Vec::new() }
    }

    pub fn with_bindings(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self { sql: sql.into(), bindings }
    }
}

/// Condition tree rendered into a WHERE clause or join restriction. Column
/// names are either alias-qualified (`table.column`) or select output names.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlCond {
    /// `column = ?`, or `column is null` for a null value.
    Eq { column: String, value: Value },
    /// `column <op> ?`
    Cmp { column: String, op: String, value: Value },
    NotNull { column: String },
    In { column: String, values: Vec<Value> },
    /// Tuple membership: `(c1, c2) in ((?, ?), ...)`.
    InTuples { columns: Vec<String>, tuples: Vec<Vec<Value>> },
    And(Vec<SqlCond>),
    Or(Vec<SqlCond>),
    /// Always false; renders `0 = 1`.
    Never,
    Raw(SqlExpr),
}

impl SqlCond {
    pub fn render(&self, sql: &mut String, bindings: &mut Vec<Value>) {
        match self {
            SqlCond::Eq { column, value } => {
                if value.is_null() {
                    sql.push_str(column);
                    sql.push_str(" is null");
                } else {
                    sql.push_str(column);
                    sql.push_str(" = ?");
                    bindings.push(value.clone());
                }
            }
            SqlCond::Cmp { column, op, value } => {
                sql.push_str(column);
                sql.push(' ');
                sql.push_str(op);
                sql.push_str(" ?");
                bindings.push(value.clone());
            }
            SqlCond::NotNull { column } => {
                sql.push_str(column);
                sql.push_str(" is not null");
            }
            SqlCond::In { column, values } => {
                if values.is_empty() {
                    sql.push_str("0 = 1");
                    return;
                }
                sql.push_str(column);
                sql.push_str(" in (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    bindings.push(value.clone());
                }
                sql.push(')');
            }
            SqlCond::InTuples { columns, tuples } => {
                if tuples.is_empty() {
                    sql.push_str("0 = 1");
                    return;
                }
                if columns.len() == 1 {
                    let values = tuples.iter().filter_map(|t| t.first().cloned()).collect();
                    SqlCond::In { column: columns[0].clone(), values }.render(sql, bindings);
                    return;
                }
                sql.push('(');
                sql.push_str(&columns.join(", "));
                sql.push_str(") in (");
                for (i, tuple) in tuples.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('(');
                    for (j, value) in tuple.iter().enumerate() {
                        if j > 0 {
                            sql.push_str(", ");
                        }
                        sql.push('?');
                        bindings.push(value.clone());
                    }
                    sql.push(')');
                }
                sql.push(')');
            }
            SqlCond::And(conds) => render_list(conds, " and ", sql, bindings),
            SqlCond::Or(conds) => render_list(conds, " or ", sql, bindings),
            SqlCond::Never => sql.push_str("0 = 1"),
            SqlCond::Raw(expr) => {
                sql.push_str(&expr.sql);
                bindings.extend(expr.bindings.iter().cloned());
            }
        }
    }

    /// True for conditions that need parentheses when embedded in a larger
    /// clause.
    pub fn is_composite(&self) -> bool {
        matches!(self, SqlCond::And(c) | SqlCond::Or(c) if c.len() > 1)
    }

    pub fn render_grouped(&self, sql: &mut String, bindings: &mut Vec<Value>) {
        if self.is_composite() {
            sql.push('(');
            self.render(sql, bindings);
            sql.push(')');
        } else {
            self.render(sql, bindings);
        }
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut bindings = Vec::new();
        self.render(&mut sql, &mut bindings);
        (sql, bindings)
    }
}

fn render_list(conds: &[SqlCond], sep: &str, sql: &mut String, bindings: &mut Vec<Value>) {
    if conds.is_empty() {
        sql.push_str("1 = 1");
        return;
    }
    if conds.len() == 1 {
        conds[0].render(sql, bindings);
        return;
    }
    for (i, cond) in conds.iter().enumerate() {
        if i > 0 {
            sql.push_str(sep);
        }
        cond.render_grouped(sql, bindings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_with_null_renders_is_null() {
        let (sql, bindings) = SqlCond::Eq { column: "a".into(), value: Value::Null }.to_sql();
        assert_eq!(sql, "a is null");
        assert!(bindings.is_empty());
    }

    #[test]
    fn nested_or_of_ands_parenthesizes_branches() {
        let cond = SqlCond::Or(vec![
            SqlCond::Cmp { column: "b".into(), op: ">".into(), value: json!("bar") },
            SqlCond::And(vec![
                SqlCond::Eq { column: "b".into(), value: json!("bar") },
                SqlCond::Cmp { column: "c".into(), op: "<".into(), value: json!(0) },
            ]),
        ]);
        let (sql, bindings) = cond.to_sql();
        assert_eq!(sql, "b > ? or (b = ? and c < ?)");
        assert_eq!(bindings, vec![json!("bar"), json!("bar"), json!(0)]);
    }

    #[test]
    fn tuple_membership_collapses_to_plain_in_for_one_column() {
        let cond = SqlCond::InTuples {
            columns: vec!["pet.owner_id".into()],
            tuples: vec![vec![json!(1)], vec![json!(2)]],
        };
        let (sql, bindings) = cond.to_sql();
        assert_eq!(sql, "pet.owner_id in (?, ?)");
        assert_eq!(bindings, vec![json!(1), json!(2)]);
    }

    #[test]
    fn tuple_membership_renders_tuples() {
        let cond = SqlCond::InTuples {
            columns: vec!["a".into(), "b".into()],
            tuples: vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)]],
        };
        let (sql, bindings) = cond.to_sql();
        assert_eq!(sql, "(a, b) in ((?, ?), (?, ?))");
        assert_eq!(bindings, vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn empty_tuple_membership_is_unsatisfiable() {
        let cond = SqlCond::InTuples { columns: vec!["a".into()], tuples: vec![] };
        assert_eq!(cond.to_sql().0, "0 = 1");
    }
}
