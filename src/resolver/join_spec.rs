use crate::sql::{ColumnRestriction, TableRef};

/// Equi-join between a parent-side and child-side column list. Columns pair
/// up positionally, so the two lists must have the same length.
#[derive(Debug, Clone)]
pub struct EquiJoin {
    pub to_table: TableRef,
    pub to_alias: Option<String>,
    pub to_columns: Vec<String>,
    pub to_restrictions: Vec<ColumnRestriction>,
    pub from_table: Option<String>,
    pub from_alias: Option<String>,
    pub from_columns: Vec<String>,
    pub from_restrictions: Vec<ColumnRestriction>,
    /// Forced joins are always attached to the built query, even when nothing
    /// selects from them.
    pub forced: bool,
}

impl EquiJoin {
    pub fn new(to_table: impl Into<TableRef>, to_columns: &[&str], from_columns: &[&str]) -> Self {
        Self {
            to_table: to_table.into(),
            to_alias: None,
            to_columns: to_columns.iter().map(|c| c.to_string()).collect(),
            to_restrictions: Vec::new(),
            from_table: None,
            from_alias: None,
            from_columns: from_columns.iter().map(|c| c.to_string()).collect(),
            from_restrictions: Vec::new(),
            forced: false,
        }
    }

    pub fn with_to_alias(mut self, alias: &str) -> Self {
        self.to_alias = Some(alias.to_string());
        self
    }

    pub fn with_from_table(mut self, table: &str) -> Self {
        self.from_table = Some(table.to_string());
        self
    }

    pub fn restrict_to(mut self, restriction: ColumnRestriction) -> Self {
        self.to_restrictions.push(restriction);
        self
    }

    pub fn restrict_from(mut self, restriction: ColumnRestriction) -> Self {
        self.from_restrictions.push(restriction);
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    /// Equivalence ignores aliases and the forced flag: two joins are the
    /// same when they target the same table through the same column pairs and
    /// restrictions.
    pub fn same_join(&self, other: &EquiJoin) -> bool {
        self.to_table.name() == other.to_table.name()
            && self.to_columns == other.to_columns
            && self.to_restrictions == other.to_restrictions
            && self.from_table == other.from_table
            && self.from_columns == other.from_columns
            && self.from_restrictions == other.from_restrictions
    }

    pub fn from_key(&self) -> JoinKey {
        JoinKey {
            table: self.from_table.clone(),
            columns: self.from_columns.clone(),
            restrictions: self.from_restrictions.clone(),
        }
    }

    pub fn to_key(&self) -> JoinKey {
        JoinKey {
            table: Some(self.to_table.name().to_string()),
            columns: self.to_columns.clone(),
            restrictions: self.to_restrictions.clone(),
        }
    }

    /// The opposite side's key when this join touches `key`, if it does.
    pub fn connecting_key(&self, key: &JoinKey) -> Option<JoinKey> {
        if self.from_key() == *key {
            Some(self.to_key())
        } else if self.to_key() == *key {
            Some(self.from_key())
        } else {
            None
        }
    }
}

/// A join target that is already materialized by an enclosing scope, e.g. a
/// back-reference to an ancestor table. `to_columns` optionally names test
/// columns whose nullness indicates an absent object.
#[derive(Debug, Clone)]
pub struct ProvidedJoin {
    pub to_alias: String,
    pub to_columns: Vec<String>,
}

impl ProvidedJoin {
    pub fn new(to_alias: &str) -> Self {
        Self { to_alias: to_alias.to_string(), to_columns: Vec::new() }
    }

    pub fn with_test_columns(mut self, columns: &[&str]) -> Self {
        self.to_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone)]
pub enum JoinSpec {
    Equi(EquiJoin),
    Provided(ProvidedJoin),
}

impl JoinSpec {
    pub fn target_name(&self) -> &str {
        match self {
            JoinSpec::Equi(join) => join.to_table.name(),
            JoinSpec::Provided(join) => &join.to_alias,
        }
    }

    pub fn test_columns(&self) -> &[String] {
        match self {
            JoinSpec::Equi(join) => &join.to_columns,
            JoinSpec::Provided(join) => &join.to_columns,
        }
    }

    pub fn same_join(&self, other: &JoinSpec) -> bool {
        match (self, other) {
            (JoinSpec::Equi(a), JoinSpec::Equi(b)) => a.same_join(b),
            (JoinSpec::Provided(a), JoinSpec::Provided(b)) => a.to_alias == b.to_alias,
            _ => false,
        }
    }
}

impl From<EquiJoin> for JoinSpec {
    fn from(join: EquiJoin) -> Self {
        JoinSpec::Equi(join)
    }
}

impl From<ProvidedJoin> for JoinSpec {
    fn from(join: ProvidedJoin) -> Self {
        JoinSpec::Provided(join)
    }
}

/// One side of an equi-join, used to chase transitive connections back to an
/// ancestor table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinKey {
    pub table: Option<String>,
    pub columns: Vec<String>,
    pub restrictions: Vec<ColumnRestriction>,
}

/// An equi-join branch of a union field, tagged with the type name reported
/// when the branch's presence-test column is non-null.
#[derive(Debug, Clone)]
pub struct UnionJoin {
    pub join: EquiJoin,
    pub type_name: String,
}

impl UnionJoin {
    pub fn new(join: EquiJoin, type_name: &str) -> Self {
        Self { join, type_name: type_name.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pet_join() -> EquiJoin {
        EquiJoin::new("pet", &["owner_id"], &["id"]).with_from_table("person")
    }

    #[test]
    fn equivalence_ignores_aliases() {
        let a = pet_join();
        let b = pet_join().with_to_alias("pets");
        assert!(a.same_join(&b));
    }

    #[test]
    fn equivalence_compares_restrictions() {
        let a = pet_join();
        let b = pet_join().restrict_to(ColumnRestriction::eq("kind", json!("cat")));
        assert!(!a.same_join(&b));
        let c = pet_join().restrict_to(ColumnRestriction::eq("kind", json!("cat")));
        assert!(b.same_join(&c));
    }

    #[test]
    fn equivalence_compares_column_order() {
        let a = EquiJoin::new("t", &["a", "b"], &["x", "y"]);
        let b = EquiJoin::new("t", &["b", "a"], &["x", "y"]);
        assert!(!a.same_join(&b));
    }

    #[test]
    fn connecting_key_walks_either_direction() {
        let join = pet_join();
        let from = join.from_key();
        let to = join.to_key();
        assert_eq!(join.connecting_key(&from), Some(to.clone()));
        assert_eq!(join.connecting_key(&to), Some(from));
        let other = JoinKey { table: Some("toy".into()), columns: vec!["id".into()], restrictions: vec![] };
        assert_eq!(join.connecting_key(&other), None);
    }
}
