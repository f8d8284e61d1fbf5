use serde_json::Value;

use crate::resolver::decode_cursor;
use crate::sql::SqlCond;

/// A cursor column as it participates in the boundary predicate: `name` keys
/// into the decoded cursor, `qualified` is the reference usable in a WHERE
/// clause, `descending` flips the comparison direction.
#[derive(Debug, Clone)]
pub struct CursorColumn {
    pub name: String,
    pub qualified: String,
    pub descending: bool,
}

/// Builds the lexicographic tuple inequality selecting rows after (or before)
/// the cursor position. Column `i` contributes the branch
/// `c_1 = v_1 and ... and c_{i-1} = v_{i-1} and c_i <op> v_i`; branches are
/// OR'd together.
///
/// Null cursor values follow "nulls sort lowest": where `>` would apply the
/// clause becomes `is not null`, and where `<` would apply the column
/// contributes no branch at all. If every column is dropped that way the
/// predicate is unsatisfiable. A cursor that fails to decode yields `None`
/// and the boundary is simply not applied.
pub fn cursor_cond(cursor: &str, columns: &[CursorColumn], before: bool) -> Option<SqlCond> {
    if columns.is_empty() {
        return None;
    }
    let fields = decode_cursor(cursor)?;

    let mut branches: Vec<SqlCond> = Vec::new();
    let mut prefix: Vec<(String, Value)> = Vec::new();
    for column in columns {
        let value = fields.get(&column.name).cloned().unwrap_or(Value::Null);
        let less = (column.descending && !before) || (!column.descending && before);

        let comparison = if !value.is_null() {
            Some(SqlCond::Cmp {
                column: column.qualified.clone(),
                op: if less { "<" } else { ">" }.to_string(),
                value: value.clone(),
            })
        } else if !less {
            Some(SqlCond::NotNull { column: column.qualified.clone() })
        } else {
            // nothing sorts before null
            None
        };

        if let Some(comparison) = comparison {
            if prefix.is_empty() {
                branches.push(comparison);
            } else {
                let mut parts: Vec<SqlCond> = prefix
                    .iter()
                    .map(|(column, value)| SqlCond::Eq { column: column.clone(), value: value.clone() })
                    .collect();
                parts.push(comparison);
                branches.push(SqlCond::And(parts));
            }
        }
        prefix.push((column.qualified.clone(), value));
    }

    Some(match branches.len() {
        0 => SqlCond::Never,
        1 => branches.into_iter().next()?,
        _ => SqlCond::Or(branches),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;

    fn cursor(json: &str) -> String {
        STANDARD.encode(json)
    }

    fn columns(specs: &[(&str, bool)]) -> Vec<CursorColumn> {
        specs
            .iter()
            .map(|(name, descending)| CursorColumn {
                name: name.to_string(),
                qualified: format!("test.{name}"),
                descending: *descending,
            })
            .collect()
    }

    fn rendered(cursor_token: &str, specs: &[(&str, bool)], before: bool) -> (String, Vec<serde_json::Value>) {
        cursor_cond(cursor_token, &columns(specs), before)
            .map(|cond| cond.to_sql())
            .unwrap_or_default()
    }

    #[test]
    fn no_columns_yields_no_filter() {
        assert!(cursor_cond(&cursor("{}"), &[], false).is_none());
    }

    #[test]
    fn after_single_field_ascending() {
        let (sql, bindings) = rendered(&cursor(r#"{"b":"bar"}"#), &[("b", false)], false);
        assert_eq!(sql, "test.b > ?");
        assert_eq!(bindings, vec![json!("bar")]);
    }

    #[test]
    fn before_single_field_ascending() {
        let (sql, _) = rendered(&cursor(r#"{"b":"bar"}"#), &[("b", false)], true);
        assert_eq!(sql, "test.b < ?");
    }

    #[test]
    fn after_single_field_descending() {
        let (sql, _) = rendered(&cursor(r#"{"b":"bar"}"#), &[("b", true)], false);
        assert_eq!(sql, "test.b < ?");
    }

    #[test]
    fn before_single_field_descending() {
        let (sql, _) = rendered(&cursor(r#"{"b":"bar"}"#), &[("b", true)], true);
        assert_eq!(sql, "test.b > ?");
    }

    #[test]
    fn after_multiple_fields_mixed_directions() {
        let (sql, bindings) = rendered(
            &cursor(r#"{"b":"bar","c":0,"d":"1970-01-01 00:00:00.000"}"#),
            &[("b", false), ("c", true), ("d", false)],
            false,
        );
        assert_eq!(
            sql,
            "test.b > ? or (test.b = ? and test.c < ?) or (test.b = ? and test.c = ? and test.d > ?)"
        );
        assert_eq!(
            bindings,
            vec![
                json!("bar"),
                json!("bar"),
                json!(0),
                json!("bar"),
                json!(0),
                json!("1970-01-01 00:00:00.000")
            ]
        );
    }

    #[test]
    fn after_null_prefix_substitutes_not_null() {
        let (sql, bindings) = rendered(
            &cursor(r#"{"a":null,"b":null,"id":42}"#),
            &[("a", false), ("b", false), ("id", false)],
            false,
        );
        assert_eq!(
            sql,
            "test.a is not null or (test.a is null and test.b is not null) \
             or (test.a is null and test.b is null and test.id > ?)"
        );
        assert_eq!(bindings, vec![json!(42)]);
    }

    #[test]
    fn before_null_prefix_keeps_equality_chain() {
        let (sql, bindings) = rendered(
            &cursor(r#"{"a":null,"b":null,"id":42}"#),
            &[("a", false), ("b", false), ("id", false)],
            true,
        );
        assert_eq!(sql, "test.a is null and test.b is null and test.id < ?");
        assert_eq!(bindings, vec![json!(42)]);
    }

    #[test]
    fn after_null_suffix() {
        let (sql, bindings) = rendered(
            &cursor(r#"{"a":null,"b":42,"c":null}"#),
            &[("a", false), ("b", false), ("c", false)],
            false,
        );
        assert_eq!(
            sql,
            "test.a is not null or (test.a is null and test.b > ?) \
             or (test.a is null and test.b = ? and test.c is not null)"
        );
        assert_eq!(bindings, vec![json!(42), json!(42)]);
    }

    #[test]
    fn before_null_suffix_drops_trailing_column() {
        let (sql, bindings) = rendered(
            &cursor(r#"{"a":null,"b":42,"c":null}"#),
            &[("a", false), ("b", false), ("c", false)],
            true,
        );
        assert_eq!(sql, "test.a is null and test.b < ?");
        assert_eq!(bindings, vec![json!(42)]);
    }

    #[test]
    fn null_on_ascending_with_descending_tiebreak() {
        let (sql, bindings) = rendered(
            &cursor(r#"{"a":null,"b":42}"#),
            &[("a", false), ("b", true)],
            false,
        );
        // "after" flips to < on the descending column
        assert_eq!(sql, "test.a is not null or (test.a is null and test.b < ?)");
        assert_eq!(bindings, vec![json!(42)]);
    }

    #[test]
    fn descending_null_value_flips_which_side_drops() {
        // "after null" on a descending column means nothing follows
        let (sql, _) = rendered(&cursor(r#"{"a":null,"b":42}"#), &[("a", true), ("b", false)], false);
        assert_eq!(sql, "test.a is null and test.b > ?");
    }

    #[test]
    fn missing_fields_read_as_null() {
        let (sql, _) = rendered(&cursor("{}"), &[("x", false), ("y", false)], false);
        assert_eq!(sql, "test.x is not null or (test.x is null and test.y is not null)");
    }

    #[test]
    fn all_dropped_columns_are_unsatisfiable() {
        let cond = cursor_cond(&cursor("{}"), &columns(&[("x", false), ("y", false)]), true).unwrap();
        assert_eq!(cond, SqlCond::Never);
    }

    #[test]
    fn invalid_cursor_is_ignored() {
        assert!(cursor_cond("!", &columns(&[("x", false)]), false).is_none());
    }
}
