use indexmap::IndexMap;

use crate::resolver::{ResolverError, ResolverId};

/// Maps logical table names to the SQL alias in scope for one resolver
/// subtree. Lookups that miss locally delegate to the enclosing scope (the
/// walk happens in the tree, which owns all scopes).
#[derive(Debug)]
pub(crate) struct TableScope {
    default_table: String,
    aliases: IndexMap<String, String>,
    outer: Option<ResolverId>,
}

impl TableScope {
    pub fn new(default_table: impl Into<String>, alias: Option<String>, outer: Option<ResolverId>) -> Self {
        let default_table = default_table.into();
        let alias = alias.unwrap_or_else(|| default_table.clone());
        let mut aliases = IndexMap::new();
        aliases.insert(default_table.clone(), alias);
        Self { default_table, aliases, outer }
    }

    pub fn default_table(&self) -> &str {
        &self.default_table
    }

    pub fn outer(&self) -> Option<ResolverId> {
        self.outer
    }

    pub fn local_alias(&self, table: &str) -> Option<&str> {
        self.aliases.get(table).map(String::as_str)
    }

    pub fn add_table_alias(&mut self, table: impl Into<String>, alias: impl Into<String>) -> Result<(), ResolverError> {
        let table = table.into();
        let alias = alias.into();
        match self.aliases.get(&table) {
            None => {
                self.aliases.insert(table, alias);
                Ok(())
            }
            Some(existing) if *existing == alias => Ok(()),
            Some(existing) => Err(ResolverError::ConflictingTableAlias {
                table,
                existing: existing.clone(),
            }),
        }
    }
}
