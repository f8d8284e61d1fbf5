use std::sync::Arc;

use heck::ToSnakeCase;
use serde_json::Value;

use crate::executor::RowExecutor;
use crate::resolver::{
    ChildLink, ConnectionArgs, EquiJoin, FetchFilter, FieldBuilder, FieldSource, JoinSpec,
    JoinTable, QueryState, ResolverError, ResolverId, ResolverOptions, Row, RowFn, TableScope,
    UnionJoin, ValueTransform,
};
use crate::sql::{SelectExpr, SqlCond, SqlExpr, TableRef};

/// How a node's polymorphic type name is determined at row-build time.
#[derive(Debug, Clone)]
pub(crate) enum TypeNameSource {
    Static(String),
    /// Union branch scan: the last branch whose test column is non-null wins,
    /// so a supertype table joined first is overridden by a more specific
    /// subtype table joined later.
    Branches(Vec<UnionBranch>),
}

#[derive(Debug, Clone)]
pub(crate) struct UnionBranch {
    pub test_column: String,
    pub type_name: String,
}

#[derive(Debug)]
pub(crate) struct DelegatingState {
    /// The query node that owns the relational query this view reads from.
    pub query: ResolverId,
    /// Select alias whose nullness marks the object absent.
    pub test_column: Option<String>,
    /// Back-reference views build from the ancestor query's current row
    /// instead of their own.
    pub from_parent_row: bool,
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub query: ResolverId,
    pub edges: ResolverId,
}

pub(crate) enum NodeKind {
    Query(QueryState),
    Delegating(DelegatingState),
    Connection(ConnectionState),
    PageInfo { query: ResolverId },
}

pub(crate) struct Node {
    pub fields: FieldBuilder,
    pub scope: TableScope,
    pub kind: NodeKind,
    pub type_name: Option<TypeNameSource>,
}

impl Node {
    fn new(kind: NodeKind, scope: TableScope) -> Self {
        Self { fields: FieldBuilder::default(), scope, kind, type_name: None }
    }
}

/// Constructs resolver trees bound to a row executor and default options.
pub struct ResolverFactory {
    executor: Arc<dyn RowExecutor>,
    options: ResolverOptions,
}

impl ResolverFactory {
    pub fn new(executor: Arc<dyn RowExecutor>, options: ResolverOptions) -> Self {
        Self { executor, options }
    }

    /// A tree whose root resolves a list of objects from `table`.
    pub fn create_query(&self, table: impl Into<TableRef>, args: ConnectionArgs) -> ResolverTree {
        let mut tree = ResolverTree::new(Arc::clone(&self.executor), self.options.clone());
        let root = tree.push_query(table.into(), args, self.options.clone());
        tree.root = root;
        tree
    }

    /// A tree whose root is a paginated connection over `table`.
    pub fn create_connection(&self, table: impl Into<TableRef>, args: ConnectionArgs) -> ResolverTree {
        let mut tree = ResolverTree::new(Arc::clone(&self.executor), self.options.clone());
        let query = tree.push_query(table.into(), args, self.options.clone());
        let conn = tree.push_connection(query);
        tree.root = conn;
        tree
    }
}

/// The resolver arena: a two-phase planning object. Plan-phase methods take
/// `&mut self` and a node id; the fetch and assembly phases run on `&self`.
pub struct ResolverTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) executor: Arc<dyn RowExecutor>,
    pub(crate) options: ResolverOptions,
    pub(crate) root: ResolverId,
    data: Row,
}

impl ResolverTree {
    fn new(executor: Arc<dyn RowExecutor>, options: ResolverOptions) -> Self {
        let data = options.initial_data.clone();
        Self { nodes: Vec::new(), executor, options, root: ResolverId(0), data }
    }

    pub fn root(&self) -> ResolverId {
        self.root
    }

    /// Free-form data shared across the resolver tree.
    pub fn data(&self) -> &Row {
        &self.data
    }

    pub fn with_data(&mut self, data: Row) -> &mut Self {
        for (key, value) in data {
            self.data.insert(key, value);
        }
        self
    }

    // ---- node plumbing ----

    pub(crate) fn node(&self, id: ResolverId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: ResolverId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn push_node(&mut self, node: Node) -> ResolverId {
        self.nodes.push(node);
        ResolverId(self.nodes.len() - 1)
    }

    fn push_query(&mut self, table: TableRef, args: ConnectionArgs, options: ResolverOptions) -> ResolverId {
        let name = table.name().to_string();
        let state = QueryState::new(table, name.clone(), args, options);
        self.push_node(Node::new(NodeKind::Query(state), TableScope::new(name, None, None)))
    }

    fn push_connection(&mut self, query: ResolverId) -> ResolverId {
        let default_table = self.node(query).scope.default_table().to_string();
        let alias = self.find_table_alias(query, &default_table);
        let edges = self.push_node(Node::new(
            NodeKind::Delegating(DelegatingState { query, test_column: None, from_parent_row: false }),
            TableScope::new(default_table.clone(), alias.clone(), Some(query)),
        ));
        self.push_node(Node::new(
            NodeKind::Connection(ConnectionState { query, edges }),
            TableScope::new(default_table, alias, Some(query)),
        ))
    }

    pub(crate) fn query_state(&self, id: ResolverId) -> Result<&QueryState, ResolverError> {
        match &self.node(id).kind {
            NodeKind::Query(state) => Ok(state),
            _ => Err(ResolverError::WrongResolverKind { expected: "query" }),
        }
    }

    pub(crate) fn query_state_mut(&mut self, id: ResolverId) -> Result<&mut QueryState, ResolverError> {
        match &mut self.node_mut(id).kind {
            NodeKind::Query(state) => Ok(state),
            _ => Err(ResolverError::WrongResolverKind { expected: "query" }),
        }
    }

    pub(crate) fn connection_state(&self, id: ResolverId) -> Result<&ConnectionState, ResolverError> {
        match &self.node(id).kind {
            NodeKind::Connection(state) => Ok(state),
            _ => Err(ResolverError::WrongResolverKind { expected: "connection" }),
        }
    }

    /// The query node owning the relational query a view reads from.
    pub(crate) fn owning_query(&self, id: ResolverId) -> Result<ResolverId, ResolverError> {
        match &self.node(id).kind {
            NodeKind::Query(_) => Ok(id),
            NodeKind::Delegating(state) => Ok(state.query),
            NodeKind::Connection(state) => Ok(state.query),
            NodeKind::PageInfo { query } => Ok(*query),
        }
    }

    // ---- table alias scope ----

    pub fn has_table(&self, id: ResolverId, table: &str) -> bool {
        self.find_table_alias(id, table).is_some()
    }

    pub fn find_table_alias(&self, id: ResolverId, table: &str) -> Option<String> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let scope = &self.node(node_id).scope;
            if let Some(alias) = scope.local_alias(table) {
                return Some(alias.to_string());
            }
            current = scope.outer();
        }
        None
    }

    pub fn table_alias(&self, id: ResolverId, table: &str) -> Result<String, ResolverError> {
        self.find_table_alias(id, table)
            .ok_or_else(|| ResolverError::UnknownTable(table.to_string()))
    }

    pub fn default_table(&self, id: ResolverId) -> &str {
        self.node(id).scope.default_table()
    }

    pub fn qualify_column(&self, id: ResolverId, column: &str, table: Option<&str>) -> Result<String, ResolverError> {
        let table = table.unwrap_or_else(|| self.node(id).scope.default_table());
        Ok(format!("{}.{column}", self.table_alias(id, table)?))
    }

    /// Fills the from side of an equi-join from the enclosing scope.
    pub(crate) fn resolve_equi(&self, id: ResolverId, mut join: EquiJoin) -> Result<EquiJoin, ResolverError> {
        if join.from_columns.len() != join.to_columns.len() {
            return Err(ResolverError::MismatchedJoinColumns {
                table: join.to_table.name().to_string(),
                from: join.from_columns.len(),
                to: join.to_columns.len(),
            });
        }
        if join.from_alias.is_none() {
            let from_table = join
                .from_table
                .clone()
                .unwrap_or_else(|| self.node(id).scope.default_table().to_string());
            let from_alias = self.table_alias(id, &from_table)?;
            join.from_table = Some(from_table);
            join.from_alias = Some(from_alias);
        }
        Ok(join)
    }

    pub(crate) fn resolve_join(&self, id: ResolverId, join: JoinSpec) -> Result<JoinSpec, ResolverError> {
        match join {
            JoinSpec::Equi(join) => Ok(JoinSpec::Equi(self.resolve_equi(id, join)?)),
            provided => Ok(provided),
        }
    }

    // ---- join registration ----

    /// Registers a join under an alias, probing `base`, `base1`, `base2`, ...
    /// until a free slot is claimed or an existing slot holds an equivalent
    /// join, whose alias is then reused. Provided joins register under their
    /// own alias; a conflicting redefinition there is a planning error.
    pub(crate) fn add_join_alias(
        &mut self,
        query: ResolverId,
        join: JoinSpec,
        alias_prefix: Option<&str>,
    ) -> Result<String, ResolverError> {
        match join {
            JoinSpec::Equi(join) => {
                let base_alias = if join.to_table.is_derived() {
                    join.to_table.name().to_string()
                } else if let Some(alias) = &join.to_alias {
                    alias.clone()
                } else {
                    let table = join.to_table.name();
                    match alias_prefix {
                        Some(prefix) if prefix != table => format!("{prefix}_{table}"),
                        _ => table.to_string(),
                    }
                };
                self.add_equi_join_alias(query, join, &base_alias)
            }
            JoinSpec::Provided(join) => {
                let join = JoinSpec::Provided(join);
                let alias = join.target_name().to_string();
                let state = self.query_state_mut(query)?;
                if alias != state.base_alias {
                    let same = state.join_tables.get(&alias).map(|existing| existing.join.same_join(&join));
                    match same {
                        None => {
                            state
                                .join_tables
                                .insert(alias.clone(), JoinTable { join, referenced: false });
                        }
                        Some(true) => {}
                        Some(false) => return Err(ResolverError::ConflictingProvidedJoin(alias)),
                    }
                }
                Ok(alias)
            }
        }
    }

    fn add_equi_join_alias(
        &mut self,
        query: ResolverId,
        join: EquiJoin,
        base_alias: &str,
    ) -> Result<String, ResolverError> {
        let join = JoinSpec::Equi(join);
        let state = self.query_state_mut(query)?;
        for index in 0usize.. {
            let alias = if index == 0 { base_alias.to_string() } else { format!("{base_alias}{index}") };
            if alias == state.base_alias {
                continue;
            }
            let same = state.join_tables.get(&alias).map(|existing| existing.join.same_join(&join));
            match same {
                None => {
                    let mut registered = join.clone();
                    let mut referenced = false;
                    if let JoinSpec::Equi(equi) = &mut registered {
                        equi.to_alias = Some(alias.clone());
                        referenced = equi.forced;
                    }
                    state.join_tables.insert(alias.clone(), JoinTable { join: registered, referenced });
                    return Ok(alias);
                }
                Some(true) => return Ok(alias),
                Some(false) => continue,
            }
        }
        unreachable!("alias probe is unbounded")
    }

    /// Registers a join and brings its target into this node's scope. The
    /// join is only attached to the physical query once forced or referenced.
    pub fn add_table(&mut self, id: ResolverId, join: impl Into<JoinSpec>) -> Result<String, ResolverError> {
        let join = self.resolve_join(id, join.into())?;
        let query = self.owning_query(id)?;
        let table = join.target_name().to_string();
        let alias = self.add_join_alias(query, join, None)?;
        self.node_mut(id).scope.add_table_alias(table, alias.clone())?;
        Ok(alias)
    }

    /// Forces a lazily registered join into the query even if nothing selects
    /// from it.
    pub fn force_table(&mut self, id: ResolverId, table: &str) -> Result<(), ResolverError> {
        let alias = self.table_alias(id, table)?;
        let query = self.owning_query(id)?;
        let state = self.query_state_mut(query)?;
        if alias != state.base_alias {
            let join_table = state
                .join_tables
                .get_mut(&alias)
                .ok_or_else(|| ResolverError::JoinNotFound(alias.clone()))?;
            if let JoinSpec::Equi(join) = &mut join_table.join {
                join.forced = true;
            }
            join_table.referenced = true;
        }
        Ok(())
    }

    // ---- selects, ordering, filters ----

    pub fn add_select_column(&mut self, id: ResolverId, column: &str) -> Result<String, ResolverError> {
        let table = self.node(id).scope.default_table().to_string();
        self.add_select_column_in(id, &table, column)
    }

    pub fn add_select_column_in(&mut self, id: ResolverId, table: &str, column: &str) -> Result<String, ResolverError> {
        let alias = self.table_alias(id, table)?;
        self.add_select_column_from_alias(id, &alias, column)
    }

    pub fn add_select_column_from_alias(
        &mut self,
        id: ResolverId,
        table_alias: &str,
        column: &str,
    ) -> Result<String, ResolverError> {
        let query = self.owning_query(id)?;
        self.query_state_mut(query)?.add_select_column_from_alias(column, table_alias)
    }

    pub fn add_select_expression(
        &mut self,
        id: ResolverId,
        expr: SqlExpr,
        alias: Option<&str>,
    ) -> Result<String, ResolverError> {
        let query = self.owning_query(id)?;
        Ok(self.query_state_mut(query)?.add_select_raw(expr, alias))
    }

    /// `coalesce` over the same column in several tables, keyed by the column
    /// name unless a collision forces a suffixed alias.
    pub fn add_coalesce_column(
        &mut self,
        id: ResolverId,
        column: &str,
        tables: &[&str],
    ) -> Result<String, ResolverError> {
        let mut aliases = Vec::with_capacity(tables.len());
        for table in tables {
            aliases.push(self.table_alias(id, table)?);
        }
        self.add_coalesce_column_from_aliases(id, column, &aliases)
    }

    pub fn add_coalesce_column_from_aliases(
        &mut self,
        id: ResolverId,
        column: &str,
        table_aliases: &[String],
    ) -> Result<String, ResolverError> {
        let query = self.owning_query(id)?;
        if table_aliases.len() == 1 {
            return self.add_select_column_from_alias(id, &table_aliases[0], column);
        }
        let state = self.query_state_mut(query)?;
        let columns = table_aliases
            .iter()
            .map(|alias| (alias.clone(), column.to_string()))
            .collect();
        Ok(state.add_select_expr(SelectExpr::Coalesce(columns), Some(column)))
    }

    pub fn set_distinct(&mut self, id: ResolverId) -> Result<(), ResolverError> {
        let query = self.owning_query(id)?;
        self.query_state_mut(query)?.distinct = true;
        Ok(())
    }

    /// Host-supplied condition on the base query; applies to data and count
    /// queries alike.
    pub fn add_where(&mut self, id: ResolverId, cond: SqlCond) -> Result<(), ResolverError> {
        let query = self.owning_query(id)?;
        self.query_state_mut(query)?.base_conds.push(cond);
        Ok(())
    }

    pub fn add_order_by(
        &mut self,
        id: ResolverId,
        column: &str,
        table: Option<&str>,
        descending: bool,
    ) -> Result<(), ResolverError> {
        let query = self.owning_query(id)?;
        let already_selected = self.query_state(query)?.has_select(column);
        let name = match table {
            Some(table) => self.add_select_column_in(id, table, column)?,
            None if already_selected => column.to_string(),
            None => self.add_select_column(id, column)?,
        };
        self.add_order_by_alias(id, &name, descending)
    }

    pub fn add_order_by_alias(&mut self, id: ResolverId, column_alias: &str, descending: bool) -> Result<(), ResolverError> {
        let query = self.owning_query(id)?;
        self.query_state_mut(query)?.add_order_by_alias(column_alias, descending);
        Ok(())
    }

    /// Adds a cursor-only column: part of the cursor tuple without affecting
    /// ordering.
    pub fn add_cursor_alias(&mut self, id: ResolverId, column_alias: &str) -> Result<(), ResolverError> {
        let query = self.owning_query(id)?;
        self.query_state_mut(query)?.add_cursor_alias(column_alias);
        Ok(())
    }

    pub fn add_fetch_filter(&mut self, id: ResolverId, filter: FetchFilter) -> Result<(), ResolverError> {
        let query = self.owning_query(id)?;
        self.query_state_mut(query)?.fetch_filters.push(filter);
        Ok(())
    }

    pub fn add_total_count(&mut self, id: ResolverId) -> Result<(), ResolverError> {
        let query = self.owning_query(id)?;
        self.query_state_mut(query)?.need_total_count = true;
        Ok(())
    }

    // ---- scalar fields ----

    pub fn add_constant_field(&mut self, id: ResolverId, field: &str, value: Value) {
        self.node_mut(id).fields.add(field, FieldSource::Constant(value));
    }

    pub fn add_derived_field(&mut self, id: ResolverId, field: &str, func: RowFn) {
        self.node_mut(id).fields.add(field, FieldSource::Derived(func));
    }

    pub fn set_type_name(&mut self, id: ResolverId, type_name: &str) {
        self.node_mut(id).type_name = Some(TypeNameSource::Static(type_name.to_string()));
    }

    /// Reports the node's type name (static, or union branch scan).
    pub fn add_typename_field(&mut self, id: ResolverId, field: &str) {
        self.node_mut(id).fields.add(field, FieldSource::TypeName(id));
    }

    pub fn add_column_field(
        &mut self,
        id: ResolverId,
        field: &str,
        column: &str,
        table: Option<&str>,
    ) -> Result<(), ResolverError> {
        let alias = match table {
            Some(table) => self.add_select_column_in(id, table, column)?,
            None => self.add_select_column(id, column)?,
        };
        self.node_mut(id).fields.add(field, FieldSource::Column { alias });
        Ok(())
    }

    pub fn add_column_field_with(
        &mut self,
        id: ResolverId,
        field: &str,
        column: &str,
        table: Option<&str>,
        transform: ValueTransform,
    ) -> Result<(), ResolverError> {
        let alias = match table {
            Some(table) => self.add_select_column_in(id, table, column)?,
            None => self.add_select_column(id, column)?,
        };
        self.node_mut(id).fields.add(field, FieldSource::ColumnWith { alias, transform });
        Ok(())
    }

    pub fn add_coalesce_column_field(
        &mut self,
        id: ResolverId,
        field: &str,
        column: &str,
        tables: &[&str],
    ) -> Result<(), ResolverError> {
        let alias = self.add_coalesce_column(id, column, tables)?;
        self.node_mut(id).fields.add(field, FieldSource::Column { alias });
        Ok(())
    }

    pub fn add_expression_field(
        &mut self,
        id: ResolverId,
        field: &str,
        expr: SqlExpr,
        alias: Option<&str>,
    ) -> Result<(), ResolverError> {
        let alias = self.add_select_expression(id, expr, alias)?;
        self.node_mut(id).fields.add(field, FieldSource::Column { alias });
        Ok(())
    }

    // ---- object fields ----

    /// A nested object backed by the same query, optionally reached through a
    /// join. On child queries, a join that exactly inverts the child's own
    /// primary join is recognized as joining back to an ancestor: if the
    /// ancestor's registered joins connect transitively to the target table,
    /// the returned resolver reads the ancestor's already-fetched row instead
    /// of re-joining.
    pub fn add_object_field(
        &mut self,
        id: ResolverId,
        field: &str,
        join: Option<JoinSpec>,
    ) -> Result<ResolverId, ResolverError> {
        let join = match join {
            Some(join) => Some(self.resolve_join(id, join)?),
            None => None,
        };

        if let Some(JoinSpec::Equi(equi)) = &join {
            if let Some(containing) = self.try_containing_resolver(id, equi)? {
                self.node_mut(id).fields.add(field, FieldSource::Object(containing));
                return Ok(containing);
            }
        }

        let query = self.owning_query(id)?;
        let object = self.create_object_node(query, id, join, field)?;
        self.node_mut(id).fields.add(field, FieldSource::Object(object));
        Ok(object)
    }

    fn try_containing_resolver(
        &mut self,
        id: ResolverId,
        join: &EquiJoin,
    ) -> Result<Option<ResolverId>, ResolverError> {
        let NodeKind::Query(state) = &self.node(id).kind else { return Ok(None) };
        let Some(link) = &state.child_link else { return Ok(None) };
        if join.from_key() != link.join.to_key() {
            return Ok(None);
        }
        let parent = link.parent;
        let to_key = join.to_key();
        let mut from_key = link.join.from_key();
        loop {
            if from_key == to_key {
                let default_table = join.to_table.name().to_string();
                let alias = self.table_alias(parent, &default_table)?;
                let node = Node::new(
                    NodeKind::Delegating(DelegatingState {
                        query: parent,
                        test_column: None,
                        from_parent_row: true,
                    }),
                    TableScope::new(default_table, Some(alias), Some(parent)),
                );
                return Ok(Some(self.push_node(node)));
            }
            let next = self.query_state(parent)?.join_tables.values().find_map(|jt| match &jt.join {
                JoinSpec::Equi(parent_join) => parent_join.connecting_key(&from_key),
                JoinSpec::Provided(_) => None,
            });
            match next {
                Some(key) => from_key = key,
                None => return Ok(None),
            }
        }
    }

    fn create_object_node(
        &mut self,
        query: ResolverId,
        outer: ResolverId,
        join: Option<JoinSpec>,
        field: &str,
    ) -> Result<ResolverId, ResolverError> {
        let (default_table, table_alias, test_column) = match join {
            Some(join) => {
                let prefix = field.to_snake_case();
                let test_columns = join.test_columns().to_vec();
                let default_table = join.target_name().to_string();
                let alias = self.add_join_alias(query, join, Some(&prefix))?;
                let test_column = match test_columns.first() {
                    Some(first) => Some(
                        self.query_state_mut(query)?.add_select_column_from_alias(first, &alias)?,
                    ),
                    None => None,
                };
                (default_table, Some(alias), test_column)
            }
            None => {
                let default_table = self.node(outer).scope.default_table().to_string();
                let alias = self.table_alias(outer, &default_table)?;
                (default_table, Some(alias), None)
            }
        };
        Ok(self.push_node(Node::new(
            NodeKind::Delegating(DelegatingState { query, test_column, from_parent_row: false }),
            TableScope::new(default_table, table_alias, Some(outer)),
        )))
    }

    /// A polymorphic object spanning one join per branch. Each branch
    /// contributes a presence-test column; `__typename` is registered
    /// automatically.
    pub fn add_union_field(
        &mut self,
        id: ResolverId,
        field: &str,
        joins: Vec<UnionJoin>,
    ) -> Result<ResolverId, ResolverError> {
        let query = self.owning_query(id)?;
        let default_table = self.node(id).scope.default_table().to_string();
        let alias = self.table_alias(id, &default_table)?;
        let union = self.push_node(Node::new(
            NodeKind::Delegating(DelegatingState { query, test_column: None, from_parent_row: false }),
            TableScope::new(default_table, Some(alias), Some(id)),
        ));
        self.add_typename_field(union, "__typename");

        let prefix = field.to_snake_case();
        let mut branches = Vec::with_capacity(joins.len());
        for union_join in joins {
            // resolve against the union scope so later branches can join from
            // tables earlier branches introduced
            let join = self.resolve_equi(union, union_join.join)?;
            let table = join.to_table.name().to_string();
            let first_column = join.to_columns.first().cloned();
            let alias = self.add_join_alias(query, JoinSpec::Equi(join), Some(&prefix))?;
            self.node_mut(union).scope.add_table_alias(table, alias.clone())?;
            if let Some(column) = first_column {
                let test_column =
                    self.query_state_mut(query)?.add_select_column_from_alias(&column, &alias)?;
                branches.push(UnionBranch { test_column, type_name: union_join.type_name });
            }
        }
        self.node_mut(union).type_name = Some(TypeNameSource::Branches(branches));
        self.node_mut(id).fields.add(field, FieldSource::Object(union));
        Ok(union)
    }

    /// Selects the same column from every union branch table (or the given
    /// subset), coalesced into one output.
    pub fn add_union_select_column(
        &mut self,
        union: ResolverId,
        column: &str,
        tables: Option<&[&str]>,
    ) -> Result<String, ResolverError> {
        let aliases: Vec<String> = match tables {
            Some(tables) => {
                let mut aliases = Vec::with_capacity(tables.len());
                for table in tables {
                    aliases.push(self.table_alias(union, table)?);
                }
                aliases
            }
            None => self.union_branch_aliases(union)?,
        };
        self.add_coalesce_column_from_aliases(union, column, &aliases)
    }

    pub fn add_union_column_field(
        &mut self,
        union: ResolverId,
        field: &str,
        column: &str,
        tables: Option<&[&str]>,
    ) -> Result<(), ResolverError> {
        let alias = self.add_union_select_column(union, column, tables)?;
        self.node_mut(union).fields.add(field, FieldSource::Column { alias });
        Ok(())
    }

    pub fn add_union_order_by(
        &mut self,
        union: ResolverId,
        column: &str,
        tables: Option<&[&str]>,
        descending: bool,
    ) -> Result<(), ResolverError> {
        let alias = self.add_union_select_column(union, column, tables)?;
        self.add_order_by_alias(union, &alias, descending)
    }

    fn union_branch_aliases(&self, union: ResolverId) -> Result<Vec<String>, ResolverError> {
        match &self.node(union).type_name {
            Some(TypeNameSource::Branches(branches)) => {
                let query = self.owning_query(union)?;
                let state = self.query_state(query)?;
                Ok(branches
                    .iter()
                    .filter_map(|branch| match state.selects.get(&branch.test_column) {
                        Some(crate::resolver::Select::Column { table, .. }) => Some(table.clone()),
                        _ => None,
                    })
                    .collect())
            }
            _ => Err(ResolverError::WrongResolverKind { expected: "union" }),
        }
    }

    // ---- list and connection fields ----

    /// Creates a child query resolver batched through the given join chain.
    /// The first join is the primary one; any further joins chain the child's
    /// default table out to the last target.
    fn create_child_query(
        &mut self,
        parent_query: ResolverId,
        outer: ResolverId,
        mut joins: Vec<EquiJoin>,
        args: ConnectionArgs,
        options: ResolverOptions,
    ) -> Result<ResolverId, ResolverError> {
        if joins.is_empty() {
            return Err(ResolverError::MissingJoin);
        }
        let primary = self.resolve_equi(outer, joins.remove(0))?;
        let base = primary.to_table.clone();
        let base_name = base.name().to_string();
        let base_alias = primary.to_alias.clone().unwrap_or_else(|| base_name.clone());
        let default_table = joins
            .last()
            .map(|join| join.to_table.name().to_string())
            .unwrap_or_else(|| base_name.clone());

        let state = QueryState::new(base, base_alias.clone(), args, options);
        let child = self.push_node(Node::new(
            NodeKind::Query(state),
            TableScope::new(default_table, None, None),
        ));
        self.node_mut(child).scope.add_table_alias(base_name.clone(), base_alias.clone())?;
        for join in joins {
            self.add_table(child, join)?;
        }

        let from_alias = match &primary.from_alias {
            Some(alias) => alias.clone(),
            None => self.node(outer).scope.default_table().to_string(),
        };
        let mut from_selects = Vec::with_capacity(primary.to_columns.len());
        let mut to_selects = Vec::with_capacity(primary.to_columns.len());
        for i in 0..primary.to_columns.len() {
            let from_select =
                self.add_select_column_from_alias(outer, &from_alias, &primary.from_columns[i])?;
            from_selects.push(from_select);
            let to_select =
                self.add_select_column_from_alias(child, &base_alias, &primary.to_columns[i])?;
            to_selects.push(to_select.clone());
            self.add_order_by_alias(child, &to_select, false)?;
        }

        self.query_state_mut(child)?.child_link =
            Some(ChildLink { parent: parent_query, join: primary, from_selects, to_selects });
        self.query_state_mut(parent_query)?.children.push(child);
        Ok(child)
    }

    /// An unpaginated list of scalars from a child table.
    pub fn add_column_list_field(
        &mut self,
        id: ResolverId,
        field: &str,
        join: EquiJoin,
        column: &str,
    ) -> Result<ResolverId, ResolverError> {
        let child = self.create_list_child(id, vec![join])?;
        let alias = self.add_select_column(child, column)?;
        let item: RowFn = Arc::new(move |row: &Row| row.get(&alias).cloned().unwrap_or(Value::Null));
        self.node_mut(id).fields.add(field, FieldSource::ValueList { child, item });
        Ok(child)
    }

    pub fn add_expression_list_field(
        &mut self,
        id: ResolverId,
        field: &str,
        join: EquiJoin,
        expr: SqlExpr,
        alias: Option<&str>,
    ) -> Result<ResolverId, ResolverError> {
        let child = self.create_list_child(id, vec![join])?;
        let alias = self.add_select_expression(child, expr, alias)?;
        let item: RowFn = Arc::new(move |row: &Row| row.get(&alias).cloned().unwrap_or(Value::Null));
        self.node_mut(id).fields.add(field, FieldSource::ValueList { child, item });
        Ok(child)
    }

    pub fn add_derived_list_field(
        &mut self,
        id: ResolverId,
        field: &str,
        join: EquiJoin,
        func: RowFn,
    ) -> Result<ResolverId, ResolverError> {
        let child = self.create_list_child(id, vec![join])?;
        self.node_mut(id).fields.add(field, FieldSource::ValueList { child, item: func });
        Ok(child)
    }

    /// An unpaginated list of objects from a child table (or join chain).
    pub fn add_object_list_field(
        &mut self,
        id: ResolverId,
        field: &str,
        joins: Vec<EquiJoin>,
    ) -> Result<ResolverId, ResolverError> {
        let child = self.create_list_child(id, joins)?;
        self.node_mut(id).fields.add(field, FieldSource::ObjectList { child });
        Ok(child)
    }

    fn create_list_child(&mut self, id: ResolverId, joins: Vec<EquiJoin>) -> Result<ResolverId, ResolverError> {
        let parent_query = self.owning_query(id)?;
        // plain lists are not page-bounded
        self.create_child_query(parent_query, id, joins, ConnectionArgs::default(), ResolverOptions::unlimited())
    }

    /// A paginated connection over a child table. Returns the connection
    /// resolver; its node resolver carries the relational query.
    pub fn add_connection_field(
        &mut self,
        id: ResolverId,
        field: &str,
        join: EquiJoin,
        args: ConnectionArgs,
    ) -> Result<ResolverId, ResolverError> {
        let parent_query = self.owning_query(id)?;
        let child = self.create_child_query(parent_query, id, vec![join], args, self.options.clone())?;
        let conn = self.push_connection(child);
        self.node_mut(id).fields.add(field, FieldSource::Connection(conn));
        Ok(conn)
    }

    // ---- connection surface ----

    /// The resolver the connection's rows are shaped by.
    pub fn node_resolver(&self, conn: ResolverId) -> Result<ResolverId, ResolverError> {
        Ok(self.connection_state(conn)?.query)
    }

    pub fn edges_resolver(&self, conn: ResolverId) -> Result<ResolverId, ResolverError> {
        Ok(self.connection_state(conn)?.edges)
    }

    pub fn add_edges(&mut self, conn: ResolverId, field: &str) -> Result<ResolverId, ResolverError> {
        let edges = self.edges_resolver(conn)?;
        self.node_mut(conn).fields.add(field, FieldSource::Edges(conn));
        Ok(edges)
    }

    pub fn add_nodes(&mut self, conn: ResolverId, field: &str) -> Result<ResolverId, ResolverError> {
        let query = self.node_resolver(conn)?;
        self.node_mut(conn).fields.add(field, FieldSource::Nodes(conn));
        Ok(query)
    }

    pub fn add_page_info(&mut self, conn: ResolverId, field: &str) -> Result<ResolverId, ResolverError> {
        let query = self.node_resolver(conn)?;
        let default_table = self.node(query).scope.default_table().to_string();
        let page_info = self.push_node(Node::new(
            NodeKind::PageInfo { query },
            TableScope::new(default_table, None, Some(query)),
        ));
        self.node_mut(conn).fields.add(field, FieldSource::PageInfo(page_info));
        Ok(page_info)
    }

    pub fn add_connection_total_count(&mut self, conn: ResolverId, field: &str) -> Result<(), ResolverError> {
        let query = self.node_resolver(conn)?;
        self.query_state_mut(query)?.need_total_count = true;
        self.node_mut(conn).fields.add(field, FieldSource::TotalCount);
        Ok(())
    }

    /// Edge hook: the row's cursor per the node query's cursor columns.
    pub fn add_cursor(&mut self, edges: ResolverId, field: &str) -> Result<(), ResolverError> {
        let query = self.owning_query(edges)?;
        self.node_mut(edges).fields.add(field, FieldSource::Cursor(query));
        Ok(())
    }

    /// Edge hook: the node object itself.
    pub fn add_node(&mut self, edges: ResolverId, field: &str) -> Result<ResolverId, ResolverError> {
        let query = self.owning_query(edges)?;
        self.node_mut(edges).fields.add(field, FieldSource::Object(query));
        Ok(query)
    }

    // ---- page info surface ----

    pub fn add_has_previous_page(&mut self, page_info: ResolverId, field: &str) {
        self.node_mut(page_info).fields.add(field, FieldSource::HasPreviousPage);
    }

    pub fn add_has_next_page(&mut self, page_info: ResolverId, field: &str) {
        self.node_mut(page_info).fields.add(field, FieldSource::HasNextPage);
    }

    pub fn add_start_cursor(&mut self, page_info: ResolverId, field: &str) -> Result<(), ResolverError> {
        let query = self.owning_query(page_info)?;
        self.node_mut(page_info).fields.add(field, FieldSource::StartCursor(query));
        Ok(())
    }

    pub fn add_end_cursor(&mut self, page_info: ResolverId, field: &str) -> Result<(), ResolverError> {
        let query = self.owning_query(page_info)?;
        self.node_mut(page_info).fields.add(field, FieldSource::EndCursor(query));
        Ok(())
    }
}
