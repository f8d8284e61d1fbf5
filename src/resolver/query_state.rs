use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use crate::resolver::{
    cursor_cond, ConnectionArgs, CursorColumn, EquiJoin, FetchFilter, FetchResult, JoinSpec,
    ResolverError, ResolverId, ResolverOptions, Row,
};
use crate::sql::{
    JoinClause, OrderBy, PartitionLimit, SelectExpr, SelectItem, SelectQuery, SqlCond, SqlExpr,
    TableRef,
};

/// A deduplicated select entry, keyed by its output name.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Select {
    Column { table: String, column: String, alias: Option<String> },
    Expression { expr: SelectExpr, alias: String },
}

impl Select {
    fn same(&self, other: &Select) -> bool {
        match (self, other) {
            (
                Select::Column { table: at, column: ac, .. },
                Select::Column { table: bt, column: bc, .. },
            ) => at == bt && ac == bc,
            (Select::Expression { expr: a, .. }, Select::Expression { expr: b, .. }) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct JoinTable {
    pub join: JoinSpec,
    /// Set once any select or order-by names this alias; unreferenced,
    /// unforced joins are never attached to the built query.
    pub referenced: bool,
}

/// Links a child query to its parent: the primary equi-join plus the select
/// output names carrying the join-key values on either side.
#[derive(Debug, Clone)]
pub(crate) struct ChildLink {
    pub parent: ResolverId,
    pub join: EquiJoin,
    pub from_selects: Vec<String>,
    pub to_selects: Vec<String>,
}

/// Planning state of one relational query (root or child): base table, select
/// entries, join registry, ordering, pagination arguments, fetch filters.
pub(crate) struct QueryState {
    pub base: TableRef,
    pub base_alias: String,
    pub args: ConnectionArgs,
    pub options: ResolverOptions,
    pub distinct: bool,
    pub selects: IndexMap<String, Select>,
    pub join_tables: IndexMap<String, JoinTable>,
    pub order_by: IndexMap<String, bool>,
    pub cursor_columns: Vec<String>,
    pub reverse_order: bool,
    pub base_conds: Vec<SqlCond>,
    pub fetch_filters: Vec<FetchFilter>,
    pub need_total_count: bool,
    pub children: Vec<ResolverId>,
    pub child_link: Option<ChildLink>,
    pub lookup: bool,
    limit: OnceCell<Option<u64>>,
}

impl QueryState {
    pub fn new(base: TableRef, base_alias: String, args: ConnectionArgs, options: ResolverOptions) -> Self {
        let reverse_order = args.last.is_some() && args.first.is_none();
        Self {
            base,
            base_alias,
            args,
            options,
            distinct: false,
            selects: IndexMap::new(),
            join_tables: IndexMap::new(),
            order_by: IndexMap::new(),
            cursor_columns: Vec::new(),
            reverse_order,
            base_conds: Vec::new(),
            fetch_filters: Vec::new(),
            need_total_count: false,
            children: Vec::new(),
            child_link: None,
            lookup: false,
            limit: OnceCell::new(),
        }
    }

    /// Marks the alias referenced so its join is attached, failing for
    /// aliases that were never registered.
    fn check_table_alias(&mut self, table_alias: &str, column: &str) -> Result<(), ResolverError> {
        if table_alias != self.base_alias {
            match self.join_tables.get_mut(table_alias) {
                Some(join_table) => join_table.referenced = true,
                None => {
                    return Err(ResolverError::UnknownTableAlias {
                        alias: table_alias.to_string(),
                        column: column.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Registers a bare column select under its own name when possible,
    /// falling back to a `tableAlias_column` disambiguated alias.
    pub fn add_select_column_from_alias(&mut self, column: &str, table_alias: &str) -> Result<String, ResolverError> {
        self.check_table_alias(table_alias, column)?;
        let select = Select::Column {
            table: table_alias.to_string(),
            column: column.to_string(),
            alias: None,
        };
        let same = self.selects.get(column).map(|existing| select.same(existing));
        match same {
            None => {
                self.selects.insert(column.to_string(), select);
                Ok(column.to_string())
            }
            Some(true) => Ok(column.to_string()),
            Some(false) => Ok(self.add_select_alias(select, &format!("{table_alias}_{column}"))),
        }
    }

    /// Probes `base`, `base1`, `base2`, ... until a free slot is claimed or
    /// an equivalent entry is found.
    fn add_select_alias(&mut self, select: Select, base_alias: &str) -> String {
        for index in 0usize.. {
            let alias = if index == 0 { base_alias.to_string() } else { format!("{base_alias}{index}") };
            let same = self.selects.get(&alias).map(|existing| select.same(existing));
            match same {
                None => {
                    let select = match select {
                        Select::Column { table, column, .. } => {
                            Select::Column { table, column, alias: Some(alias.clone()) }
                        }
                        Select::Expression { expr, .. } => {
                            Select::Expression { expr, alias: alias.clone() }
                        }
                    };
                    self.selects.insert(alias.clone(), select);
                    return alias;
                }
                Some(true) => return alias,
                Some(false) => continue,
            }
        }
        unreachable!("alias probe is unbounded")
    }

    pub fn add_select_expr(&mut self, expr: SelectExpr, alias: Option<&str>) -> String {
        let alias = alias.unwrap_or("expr").to_string();
        self.add_select_alias(Select::Expression { expr, alias: alias.clone() }, &alias)
    }

    pub fn add_select_raw(&mut self, expr: SqlExpr, alias: Option<&str>) -> String {
        self.add_select_expr(SelectExpr::Raw(expr), alias)
    }

    pub fn has_select(&self, name: &str) -> bool {
        self.selects.contains_key(name)
    }

    pub fn add_order_by_alias(&mut self, column_alias: &str, descending: bool) {
        if !self.order_by.contains_key(column_alias) {
            let descending = if self.reverse_order { !descending } else { descending };
            self.order_by.insert(column_alias.to_string(), descending);
            self.cursor_columns.push(column_alias.to_string());
        }
    }

    pub fn add_cursor_alias(&mut self, column_alias: &str) {
        if !self.cursor_columns.iter().any(|c| c == column_alias) {
            self.cursor_columns.push(column_alias.to_string());
        }
    }

    /// The effective page size: `first`/`last` override the default, the
    /// server-side maximum clamps the result, `None` means unbounded.
    /// Memoized per resolver instance.
    pub fn get_limit(&self) -> Result<Option<u64>, ResolverError> {
        self.limit
            .get_or_try_init(|| {
                let mut limit = self.options.default_limit;
                if let Some(first) = self.args.first {
                    if first < 0 {
                        return Err(ResolverError::UserInput(
                            "first argument cannot be less than zero".to_string(),
                        ));
                    }
                    limit = Some(first as u64);
                }
                if let Some(last) = self.args.last {
                    if last < 0 {
                        return Err(ResolverError::UserInput(
                            "last argument cannot be less than zero".to_string(),
                        ));
                    }
                    if self.args.first.is_none() {
                        limit = Some(last as u64);
                    }
                }
                if let (Some(n), Some(max)) = (limit, self.options.max_limit) {
                    if n > max {
                        limit = Some(max);
                    }
                }
                Ok(limit)
            })
            .copied()
    }

    pub fn filter_fetch(&self, rows: Vec<Row>) -> Vec<Row> {
        self.fetch_filters.iter().fold(rows, |rows, filter| filter(rows))
    }

    /// Interprets the `limit + 1` over-fetch and applies forward or backward
    /// page-boundary semantics; backward results are reversed back into
    /// forward display order.
    pub fn build_fetch_result(&self, mut rows: Vec<Row>) -> Result<FetchResult, ResolverError> {
        let mut has_previous_page = false;
        let mut has_next_page = false;
        let limit = self.get_limit()?;
        if !self.reverse_order {
            if self.args.after.is_some() {
                has_previous_page = true;
            }
            if let Some(limit) = limit {
                if rows.len() > limit as usize {
                    has_next_page = true;
                    rows.truncate(limit as usize);
                }
            }
            if let Some(last) = self.args.last {
                let last = last.max(0) as usize;
                if rows.len() > last {
                    has_previous_page = true;
                    rows.drain(..rows.len() - last);
                }
            }
        } else {
            if self.args.before.is_some() {
                has_next_page = true;
            }
            if let Some(limit) = limit {
                if rows.len() > limit as usize {
                    has_previous_page = true;
                    rows.truncate(limit as usize);
                }
            }
            rows.reverse();
        }
        Ok(FetchResult {
            rows,
            has_previous_page,
            has_next_page,
            after_cursor: self.args.after.clone(),
            before_cursor: self.args.before.clone(),
            total_count: None,
        })
    }

    pub fn new_base_query(&self) -> SelectQuery {
        let mut query = SelectQuery::new(self.base.clone());
        if self.base_alias != self.base.name() {
            query.base_alias = Some(self.base_alias.clone());
        }
        query.conds = self.base_conds.clone();
        query
    }

    /// Joins, selects, ordering, and cursor boundaries; page limiting is the
    /// root/child fetch code's concern.
    pub fn build_data_query(&self, mut query: SelectQuery) -> Result<SelectQuery, ResolverError> {
        self.apply_join_tables(&mut query);
        self.apply_select(&mut query);
        self.apply_order_by(&mut query);
        self.apply_page_range(&mut query);
        Ok(query)
    }

    /// Joins and selects only, for queries whose row set is seeded externally.
    pub fn build_search_query(&self, mut query: SelectQuery) -> SelectQuery {
        self.apply_join_tables(&mut query);
        self.apply_select(&mut query);
        query
    }

    /// `count(*)` over the base table; only forced joins participate.
    pub fn build_total_count_query(&self) -> SelectQuery {
        let mut query = self.new_base_query();
        self.apply_join_tables_where(&mut query, |join_table| match &join_table.join {
            JoinSpec::Equi(join) => join.forced,
            JoinSpec::Provided(_) => false,
        });
        query.count_alias = Some("total_count".to_string());
        query
    }

    fn apply_join_tables(&self, query: &mut SelectQuery) {
        self.apply_join_tables_where(query, |join_table| match &join_table.join {
            JoinSpec::Equi(join) => join.forced || join_table.referenced,
            JoinSpec::Provided(_) => false,
        });
    }

    fn apply_join_tables_where(&self, query: &mut SelectQuery, keep: impl Fn(&JoinTable) -> bool) {
        for (alias, join_table) in &self.join_tables {
            if !keep(join_table) {
                continue;
            }
            let JoinSpec::Equi(join) = &join_table.join else { continue };
            let from_alias = join
                .from_alias
                .clone()
                .or_else(|| join.from_table.clone())
                .unwrap_or_else(|| self.base_alias.clone());
            let mut on = Vec::with_capacity(join.to_columns.len());
            for (to_column, from_column) in join.to_columns.iter().zip(&join.from_columns) {
                on.push((format!("{alias}.{to_column}"), format!("{from_alias}.{from_column}")));
            }
            let mut restrictions = Vec::new();
            for restriction in &join.to_restrictions {
                restrictions.push((alias.clone(), restriction.clone()));
            }
            for restriction in &join.from_restrictions {
                restrictions.push((from_alias.clone(), restriction.clone()));
            }
            query.joins.push(JoinClause {
                table: join.to_table.clone(),
                alias: alias.clone(),
                on,
                restrictions,
            });
        }
    }

    fn apply_select(&self, query: &mut SelectQuery) {
        query.distinct = self.distinct;
        for select in self.selects.values() {
            query.selects.push(match select {
                Select::Column { table, column, alias } => SelectItem {
                    expr: SelectExpr::Column { table: table.clone(), column: column.clone() },
                    alias: alias.clone(),
                },
                Select::Expression { expr, alias } => SelectItem {
                    expr: expr.clone(),
                    alias: Some(alias.clone()),
                },
            });
        }
    }

    fn apply_order_by(&self, query: &mut SelectQuery) {
        for (name, descending) in &self.order_by {
            query.order_by.push(OrderBy { name: name.clone(), descending: *descending });
        }
    }

    fn apply_page_range(&self, query: &mut SelectQuery) {
        let columns = self.cursor_fields();
        if let Some(after) = &self.args.after {
            if let Some(cond) = cursor_cond(after, &columns, false) {
                query.conds.push(cond);
            }
        }
        if let Some(before) = &self.args.before {
            if let Some(cond) = cursor_cond(before, &columns, true) {
                query.conds.push(cond);
            }
        }
    }

    /// Cursor columns with the WHERE-clause reference for each: the
    /// underlying qualified column for bare selects, the output name itself
    /// for expressions.
    pub fn cursor_fields(&self) -> Vec<CursorColumn> {
        self.cursor_columns
            .iter()
            .map(|name| {
                let qualified = match self.selects.get(name) {
                    Some(Select::Column { table, column, .. }) => format!("{table}.{column}"),
                    _ => name.clone(),
                };
                let descending = self.order_by.get(name).copied().unwrap_or(false);
                CursorColumn { name: name.clone(), qualified, descending }
            })
            .collect()
    }

    /// Window limiting for child fetches: `limit + 1` rows per parent group
    /// in one round trip. Disabled when fetch filters run in-process (the
    /// SQL-side cut would apply at the wrong stage) or the limit is
    /// unbounded.
    pub fn apply_partition_limit(&self, query: &mut SelectQuery) -> Result<(), ResolverError> {
        if !self.fetch_filters.is_empty() {
            return Ok(());
        }
        let Some(limit) = self.get_limit()? else { return Ok(()) };
        let Some(link) = &self.child_link else { return Ok(()) };
        let to_table = link.join.to_table.name();
        let partition_by = link
            .join
            .to_columns
            .iter()
            .map(|column| format!("{to_table}.{column}"))
            .collect();
        // the first order-by entry is the join to-column itself
        let order_by = self
            .order_by
            .iter()
            .skip(1)
            .map(|(name, descending)| OrderBy { name: name.clone(), descending: *descending })
            .collect();
        query.partition_limit = Some(PartitionLimit { partition_by, order_by, limit: limit + 1 });
        Ok(())
    }
}
