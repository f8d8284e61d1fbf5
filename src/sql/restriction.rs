use serde_json::Value;

use crate::sql::SqlCond;

/// Static restriction attached to one side of a join, or to a child fetch.
/// The target is either a column (qualified with the owning side's alias when
/// rendered) or a select alias that is already in scope.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnTarget {
    Column(String),
    Alias(String),
}

impl ColumnTarget {
    pub fn qualified(&self, qualifier: &str) -> String {
        match self {
            ColumnTarget::Column(column) => format!("{qualifier}.{column}"),
            ColumnTarget::Alias(alias) => alias.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestrictionKind {
    /// `target <op> value`; the operator defaults to `=`.
    Compare { op: String, value: Value },
    /// `target in (values...)`
    In(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRestriction {
    pub target: ColumnTarget,
    pub kind: RestrictionKind,
}

impl ColumnRestriction {
    pub fn eq(column: &str, value: Value) -> Self {
        Self::compare(column, "=", value)
    }

    pub fn compare(column: &str, op: &str, value: Value) -> Self {
        Self {
            target: ColumnTarget::Column(column.to_string()),
            kind: RestrictionKind::Compare { op: op.to_string(), value },
        }
    }

    pub fn in_values(column: &str, values: Vec<Value>) -> Self {
        Self {
            target: ColumnTarget::Column(column.to_string()),
            kind: RestrictionKind::In(values),
        }
    }

    pub fn alias_eq(alias: &str, value: Value) -> Self {
        Self {
            target: ColumnTarget::Alias(alias.to_string()),
            kind: RestrictionKind::Compare { op: "=".to_string(), value },
        }
    }

    pub fn to_cond(&self, qualifier: &str) -> SqlCond {
        let column = self.target.qualified(qualifier);
        match &self.kind {
            RestrictionKind::Compare { op, value } if op == "=" => {
                SqlCond::Eq { column, value: value.clone() }
            }
            RestrictionKind::Compare { op, value } => SqlCond::Cmp {
                column,
                op: op.clone(),
                value: value.clone(),
            },
            RestrictionKind::In(values) => SqlCond::In { column, values: values.clone() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equivalent_restrictions_compare_equal() {
        assert_eq!(
            ColumnRestriction::eq("kind", json!("cat")),
            ColumnRestriction::compare("kind", "=", json!("cat"))
        );
        assert_ne!(
            ColumnRestriction::eq("kind", json!("cat")),
            ColumnRestriction::eq("kind", json!("dog"))
        );
        assert_ne!(
            ColumnRestriction::eq("kind", json!("cat")),
            ColumnRestriction::in_values("kind", vec![json!("cat")])
        );
    }

    #[test]
    fn qualifies_columns_but_not_aliases() {
        let column = ColumnRestriction::eq("kind", json!("cat"));
        assert_eq!(column.target.qualified("pet"), "pet.kind");
        let alias = ColumnRestriction::alias_eq("pet_kind", json!("cat"));
        assert_eq!(alias.target.qualified("pet"), "pet_kind");
    }
}
