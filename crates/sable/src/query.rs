//! The chainable query builder and its execution layer.
//!
//! Configuration methods consume and return the query; execution methods
//! take the pool and finish it. Statements run against the pool unless a
//! transaction was attached, with the exception of relation prefetches,
//! which always use the pool.

use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::any::{Any, AnyArguments, AnyRow};
use sqlx::{AnyConnection, AnyPool};
use sqlx::Row;
use tracing::debug;

use crate::dialect::{
    default_dialect, Dialect, JoinClause, JoinDirection, QueryState, TableCreateOptions,
    TableDropOptions,
};
use crate::error::{OrmError, Result};
use crate::filter::{and, flatten, or, q, FilterArg, FilterClause, IntoLeftOperand,
    IntoRightOperand};
use crate::fragment::SelectExpr;
use crate::schema::{ColumnDef, ColumnKind, Model, ModelDescriptor, RowMap};
use crate::relation::Relation;
use crate::value::{SqlValue, DATETIME_FORMAT};

fn bind_args<'q>(
    sql: &'q str,
    args: &[SqlValue],
) -> sqlx::query::Query<'q, Any, AnyArguments<'q>> {
    let mut query = sqlx::query(sql);
    for value in args {
        query = match value {
            SqlValue::Null => query.bind(Option::<i64>::None),
            SqlValue::Bool(value) => query.bind(*value),
            SqlValue::Int(value) => query.bind(*value),
            SqlValue::Float(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.clone()),
            SqlValue::Timestamp(value) => query.bind(value.format(DATETIME_FORMAT).to_string()),
        };
    }
    query
}

/// A query against the table of `T`.
pub struct Query<'t, T: Model> {
    state: QueryState,
    descriptor: Arc<ModelDescriptor>,
    dialect: Option<Arc<dyn Dialect>>,
    transaction: Option<&'t mut AnyConnection>,
    marker: PhantomData<fn() -> T>,
}

impl<'t, T: Model> Query<'t, T> {
    pub fn new(descriptor: Arc<ModelDescriptor>) -> Self {
        let state = QueryState {
            table: descriptor.table.clone(),
            columns: descriptor.columns.clone(),
            ..QueryState::default()
        };
        Self {
            state,
            descriptor,
            dialect: None,
            transaction: None,
            marker: PhantomData,
        }
    }

    /// The configured state, for embedding this query as a subquery.
    pub fn into_state(self) -> QueryState {
        self.state
    }

    /// Adds a predicate, joined with AND to anything already present.
    #[must_use]
    pub fn filter(
        mut self,
        left: impl IntoLeftOperand,
        operator: impl Into<String>,
        right: impl IntoRightOperand,
    ) -> Self {
        if !self.state.filters.is_empty() {
            self.state.filters.push(FilterClause::And);
        }
        self.state.filters.push(q(left, operator, right));
        self
    }

    /// Adds an AND-combined group.
    #[must_use]
    pub fn filter_and(mut self, args: Vec<FilterArg>) -> Self {
        if !self.state.filters.is_empty() {
            self.state.filters.push(FilterClause::And);
        }
        self.state.filters.extend(and(args));
        self
    }

    /// Adds an OR-combined group, joined with AND to anything already
    /// present.
    #[must_use]
    pub fn filter_or(mut self, args: Vec<FilterArg>) -> Self {
        if !self.state.filters.is_empty() {
            self.state.filters.push(FilterClause::And);
        }
        self.state.filters.extend(or(args));
        self
    }

    fn push_join(mut self, direction: JoinDirection, table: &str, on: Vec<FilterArg>) -> Self {
        self.state.joins.push(JoinClause {
            direction,
            table: table.to_string(),
            on: flatten(on),
        });
        self
    }

    #[must_use]
    pub fn join(self, table: &str, on: Vec<FilterArg>) -> Self {
        self.push_join(JoinDirection::Inner, table, on)
    }

    #[must_use]
    pub fn join_left(self, table: &str, on: Vec<FilterArg>) -> Self {
        self.push_join(JoinDirection::Left, table, on)
    }

    #[must_use]
    pub fn join_right(self, table: &str, on: Vec<FilterArg>) -> Self {
        self.push_join(JoinDirection::Right, table, on)
    }

    #[must_use]
    pub fn join_full(self, table: &str, on: Vec<FilterArg>) -> Self {
        self.push_join(JoinDirection::Full, table, on)
    }

    /// Replaces the sort keys. A `-` prefix sorts descending.
    #[must_use]
    pub fn sort(mut self, columns: &[&str]) -> Self {
        self.state.sort = columns.iter().map(ToString::to_string).collect();
        self
    }

    /// Replaces the select list.
    #[must_use]
    pub fn select(mut self, exprs: Vec<SelectExpr>) -> Self {
        self.state.selected = exprs;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: i64) -> Self {
        self.state.offset = Some(offset);
        self
    }

    /// Requests batched loading of the named relation columns during
    /// `all`/`first`.
    #[must_use]
    pub fn fetch_related(mut self, columns: &[&str]) -> Self {
        self.state
            .fetch_related
            .extend(columns.iter().map(ToString::to_string));
        self
    }

    /// Overrides the dialect for this query only.
    #[must_use]
    pub fn dialect(mut self, dialect: impl Dialect + 'static) -> Self {
        self.dialect = Some(Arc::new(dialect));
        self
    }

    /// Routes execution through a caller-managed transaction. Prefetch
    /// queries still use the pool.
    #[must_use]
    pub fn transaction(mut self, transaction: &'t mut AnyConnection) -> Self {
        self.transaction = Some(transaction);
        self
    }

    fn resolve_dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone().unwrap_or_else(default_dialect)
    }

    async fn run_fetch(
        &mut self,
        pool: &AnyPool,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<AnyRow>> {
        let query = bind_args(sql, args);
        match self.transaction.as_deref_mut() {
            Some(connection) => Ok(query.fetch_all(connection).await?),
            None => Ok(query.fetch_all(pool).await?),
        }
    }

    async fn run_execute(&mut self, pool: &AnyPool, sql: &str, args: &[SqlValue]) -> Result<u64> {
        let query = bind_args(sql, args);
        let result = match self.transaction.as_deref_mut() {
            Some(connection) => query.execute(connection).await?,
            None => query.execute(pool).await?,
        };
        Ok(result.rows_affected())
    }

    /// Runs the select and materializes every row.
    pub async fn all(mut self, pool: &AnyPool) -> Result<Vec<T>> {
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_select(&self.state)?;
        debug!(table = %self.state.table, sql = %sql, "select");
        let raw_rows = self.run_fetch(pool, &sql, &args).await?;

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in &raw_rows {
            let data = self.descriptor.scan_row(raw)?;
            let mut row = T::from_row(&data)?;
            seed_relations(&self.descriptor, &mut row);
            rows.push(row);
        }

        if !self.state.fetch_related.is_empty() {
            let relations = self.state.fetch_related.clone();
            prefetch(&self.descriptor, &mut rows, &relations, pool).await?;
        }
        Ok(rows)
    }

    /// Runs the select and returns raw column maps. Relations are not
    /// prefetched.
    pub async fn all_to_map(mut self, pool: &AnyPool) -> Result<Vec<RowMap>> {
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_select(&self.state)?;
        debug!(table = %self.state.table, sql = %sql, "select to map");
        let raw_rows = self.run_fetch(pool, &sql, &args).await?;
        raw_rows
            .iter()
            .map(|raw| self.descriptor.scan_row(raw))
            .collect()
    }

    /// Returns the first row, or [`OrmError::NotFound`].
    pub async fn first(mut self, pool: &AnyPool) -> Result<T> {
        self.state.limit = Some(1);
        self.all(pool)
            .await?
            .into_iter()
            .next()
            .ok_or(OrmError::NotFound)
    }

    /// Returns the first row as a column map, or [`OrmError::NotFound`].
    pub async fn first_to_map(mut self, pool: &AnyPool) -> Result<RowMap> {
        self.state.limit = Some(1);
        self.all_to_map(pool)
            .await?
            .into_iter()
            .next()
            .ok_or(OrmError::NotFound)
    }

    /// Counts matching rows without materializing them.
    pub async fn count(mut self, pool: &AnyPool) -> Result<i64> {
        self.state.count = true;
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_select(&self.state)?;
        debug!(table = %self.state.table, sql = %sql, "count");
        let rows = self.run_fetch(pool, &sql, &args).await?;
        let row = rows.first().ok_or(OrmError::NotFound)?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    /// Whether any row matches; fetches at most one row.
    pub async fn exists(mut self, pool: &AnyPool) -> Result<bool> {
        self.state.limit = Some(1);
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_select(&self.state)?;
        debug!(table = %self.state.table, sql = %sql, "exists");
        let rows = self.run_fetch(pool, &sql, &args).await?;
        Ok(!rows.is_empty())
    }

    /// Deletes matching rows and returns the affected count.
    pub async fn delete(mut self, pool: &AnyPool) -> Result<u64> {
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_delete(&self.state)?;
        debug!(table = %self.state.table, sql = %sql, "delete");
        self.run_execute(pool, &sql, &args).await
    }

    /// Inserts the row. A zero-valued primary key is omitted so the engine
    /// can assign one; columns follow declaration order.
    pub async fn insert(mut self, pool: &AnyPool, row: &T) -> Result<u64> {
        let mut map = row.to_row();
        if let Some(pk) = self.descriptor.primary_column {
            if map.get(pk).is_some_and(SqlValue::is_zero) {
                map.remove(pk);
            }
        }
        let columns: Vec<String> = self
            .descriptor
            .columns
            .iter()
            .filter(|column| map.contains(column.name))
            .map(|column| column.name.to_string())
            .collect();
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_insert(&self.state, &map, &columns)?;
        debug!(table = %self.state.table, sql = %sql, "insert");
        self.run_execute(pool, &sql, &args).await
    }

    /// Inserts the map verbatim; nothing is omitted. Columns are taken in
    /// sorted name order.
    pub async fn insert_map(mut self, pool: &AnyPool, map: RowMap) -> Result<u64> {
        let columns = map.sorted_columns();
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_insert(&self.state, &map, &columns)?;
        debug!(table = %self.state.table, sql = %sql, "insert map");
        self.run_execute(pool, &sql, &args).await
    }

    /// Updates the named columns from the row image, for rows matching the
    /// query filters.
    pub async fn update(mut self, pool: &AnyPool, row: &T, columns: &[&str]) -> Result<u64> {
        let map = row.to_row();
        let columns: Vec<String> = columns.iter().map(ToString::to_string).collect();
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_update(&self.state, &map, &columns)?;
        debug!(table = %self.state.table, sql = %sql, "update");
        self.run_execute(pool, &sql, &args).await
    }

    /// Updates from a column map; columns are taken in sorted name order.
    pub async fn update_map(mut self, pool: &AnyPool, map: RowMap) -> Result<u64> {
        let columns = map.sorted_columns();
        let dialect = self.resolve_dialect();
        let (sql, args) = dialect.build_update(&self.state, &map, &columns)?;
        debug!(table = %self.state.table, sql = %sql, "update map");
        self.run_execute(pool, &sql, &args).await
    }

    /// Creates the model's table.
    pub async fn table_create(mut self, pool: &AnyPool, options: TableCreateOptions) -> Result<()> {
        let dialect = self.resolve_dialect();
        let sql = dialect.build_table_create(&self.state, options)?;
        debug!(table = %self.state.table, sql = %sql, "create table");
        self.run_execute(pool, &sql, &[]).await?;
        Ok(())
    }

    /// Drops the model's table.
    pub async fn table_drop(mut self, pool: &AnyPool, options: TableDropOptions) -> Result<()> {
        let dialect = self.resolve_dialect();
        let sql = dialect.build_table_drop(&self.state, options)?;
        debug!(table = %self.state.table, sql = %sql, "drop table");
        self.run_execute(pool, &sql, &[]).await?;
        Ok(())
    }

    /// Adds a column to the model's table.
    pub async fn table_column_add(mut self, pool: &AnyPool, column: &ColumnDef) -> Result<()> {
        let dialect = self.resolve_dialect();
        let sql = dialect.build_column_add(&self.state, column)?;
        debug!(table = %self.state.table, sql = %sql, "add column");
        self.run_execute(pool, &sql, &[]).await?;
        Ok(())
    }

    /// Drops a column from the model's table.
    pub async fn table_column_drop(mut self, pool: &AnyPool, column: &str) -> Result<()> {
        let dialect = self.resolve_dialect();
        let sql = dialect.build_column_drop(&self.state, column)?;
        debug!(table = %self.state.table, sql = %sql, "drop column");
        self.run_execute(pool, &sql, &[]).await?;
        Ok(())
    }

    /// Escape hatch: runs arbitrary SQL and materializes rows through the
    /// model's schema.
    pub async fn sql_all(mut self, pool: &AnyPool, sql: &str, params: Vec<SqlValue>) -> Result<Vec<T>> {
        let raw_rows = self.run_fetch(pool, sql, &params).await?;
        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in &raw_rows {
            let data = self.descriptor.scan_row(raw)?;
            let mut row = T::from_row(&data)?;
            seed_relations(&self.descriptor, &mut row);
            rows.push(row);
        }
        Ok(rows)
    }

    /// Escape hatch: runs arbitrary SQL and returns raw column maps.
    pub async fn sql_all_to_map(
        mut self,
        pool: &AnyPool,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> Result<Vec<RowMap>> {
        let raw_rows = self.run_fetch(pool, sql, &params).await?;
        raw_rows
            .iter()
            .map(|raw| self.descriptor.scan_row(raw))
            .collect()
    }
}

fn seed_relations<T: Model>(descriptor: &ModelDescriptor, row: &mut T) {
    let owner_key = row.pk();
    for column in &descriptor.columns {
        if let ColumnKind::OneToMany { related_column, .. } = column.kind {
            if let Some(relation) = row.relation_mut(column.name) {
                relation.seed(related_column, owner_key.clone());
            }
        }
    }
}

async fn prefetch<T: Model>(
    descriptor: &Arc<ModelDescriptor>,
    rows: &mut [T],
    relations: &[String],
    pool: &AnyPool,
) -> Result<()> {
    for name in relations {
        let column = descriptor
            .column(name)
            .ok_or_else(|| OrmError::InvalidRelation {
                column: name.clone(),
                table: descriptor.table.clone(),
            })?;
        let (to_many, filter_column) = match &column.kind {
            ColumnKind::ForeignKey { related } => {
                let related_descriptor = related();
                let pk = related_descriptor.primary_column.ok_or_else(|| {
                    OrmError::MissingPrimaryKey(related_descriptor.table.clone())
                })?;
                (false, pk.to_string())
            }
            ColumnKind::OneToMany { related_column, .. } => (true, (*related_column).to_string()),
            _ => {
                return Err(OrmError::InvalidRelation {
                    column: name.clone(),
                    table: descriptor.table.clone(),
                })
            }
        };

        let mut keys: Vec<SqlValue> = Vec::new();
        let mut loader = None;
        for row in rows.iter() {
            if loader.is_none() {
                loader = row.relation(name).map(Relation::loader);
            }
            let key = if to_many {
                Some(row.pk())
            } else {
                row.relation(name).and_then(Relation::key)
            };
            if let Some(key) = key {
                if key != SqlValue::Null && !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        if keys.is_empty() {
            continue;
        }
        let Some(loader) = loader else {
            return Err(OrmError::InvalidRelation {
                column: name.clone(),
                table: descriptor.table.clone(),
            });
        };

        debug!(
            table = %descriptor.table,
            relation = %name,
            keys = keys.len(),
            "prefetching relation"
        );
        let batch = loader.fetch(pool, filter_column, keys).await?;
        for row in rows.iter_mut() {
            let owner_key = row.pk();
            if let Some(relation) = row.relation_mut(name) {
                relation.attach(&batch, &owner_key);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{or, q};
    use crate::fragment::alias;
    use crate::schema::{descriptor, ColumnDef, Model};
    use crate::testutil::TestDialect;
    use crate::value::SqlValue;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Account {
        id: i64,
        email: String,
        group_id: i64,
    }

    impl Model for Account {
        fn columns() -> Vec<ColumnDef> {
            vec![
                ColumnDef::new("id", ColumnKind::BigInt).primary_key(),
                ColumnDef::new("email", ColumnKind::Text).max_length(255),
                ColumnDef::new("group_id", ColumnKind::BigInt),
            ]
        }

        fn to_row(&self) -> RowMap {
            RowMap::new()
                .with("id", self.id)
                .with("email", self.email.as_str())
                .with("group_id", self.group_id)
        }

        fn from_row(row: &RowMap) -> Result<Self> {
            Ok(Self {
                id: row.get_i64("id"),
                email: row.get_string("email"),
                group_id: row.get_i64("group_id"),
            })
        }

        fn pk(&self) -> SqlValue {
            SqlValue::Int(self.id)
        }
    }

    fn build(query: Query<'_, Account>) -> (String, Vec<SqlValue>) {
        TestDialect.build_select(&query.into_state()).unwrap()
    }

    #[test]
    fn test_filter_accumulates_with_and() {
        let query = Account::query()
            .filter("id", "=", 1)
            .filter("email", "=", "a@b.c");
        let (sql, args) = build(query);
        assert_eq!(
            sql,
            "SELECT * FROM \"account\" WHERE \"id\" = $1 AND \"email\" = $2"
        );
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_filter_or_group() {
        let query =
            Account::query().filter_or(vec![q("id", "=", 1).into(), q("id", "=", 2).into()]);
        let (sql, args) = build(query);
        assert_eq!(
            sql,
            "SELECT * FROM \"account\" WHERE ( \"id\" = $1 OR \"id\" = $2 )"
        );
        assert_eq!(args, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_filter_then_group_joined_with_and() {
        let query = Account::query().filter("id", ">", 0).filter_and(vec![
            q("email", "LIKE", "%@example.com").into(),
            or(vec![q("id", "=", 1).into(), q("id", "=", 2).into()]).into(),
        ]);
        let (sql, _) = build(query);
        assert_eq!(
            sql,
            "SELECT * FROM \"account\" WHERE \"id\" > $1 AND ( \"email\" LIKE $2 AND ( \"id\" = $3 OR \"id\" = $4 ) )"
        );
    }

    #[test]
    fn test_join_with_on_group() {
        let query = Account::query().join(
            "groups",
            vec![or(vec![
                q(crate::fragment::column("groups.id"), "=", crate::fragment::column("account.group_id")).into(),
                q("groups.id", "IS", Option::<i64>::None).into(),
            ])
            .into()],
        );
        let (sql, args) = build(query);
        assert_eq!(
            sql,
            "SELECT * FROM \"account\" INNER JOIN \"groups\" ON ( \"groups\".\"id\" = \"account\".\"group_id\" OR \"groups\".\"id\" IS NULL )"
        );
        assert!(args.is_empty());
    }

    #[test]
    fn test_sort_select_limit_offset() {
        let query = Account::query()
            .select(vec!["id".into(), alias("email", "address")])
            .sort(&["id", "-email"])
            .limit(10)
            .offset(20);
        let (sql, args) = build(query);
        assert_eq!(
            sql,
            "SELECT \"id\",\"email\" AS \"address\" FROM \"account\" ORDER BY \"id\" ASC, \"email\" DESC LIMIT $1 OFFSET $2"
        );
        assert_eq!(args, vec![SqlValue::Int(10), SqlValue::Int(20)]);
    }

    #[test]
    fn test_subquery_numbering_continues() {
        let inner = Account::query().filter("email", "=", "x@y.z");
        let query = Account::query()
            .filter("id", ">", 0)
            .filter("id", "IN", inner);
        let (sql, args) = build(query);
        assert_eq!(
            sql,
            "SELECT * FROM \"account\" WHERE \"id\" > $1 AND \"id\" IN (SELECT * FROM \"account\" WHERE \"email\" = $2)"
        );
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_query_builds_identical_sql_twice() {
        let make = || Account::query().filter("id", "=", 1).sort(&["-id"]).limit(5);
        let (first_sql, first_args) = build(make());
        let (second_sql, second_args) = build(make());
        assert_eq!(first_sql, second_sql);
        assert_eq!(first_args, second_args);
    }

    #[test]
    fn test_exists_predicate() {
        let inner = Account::query().filter("group_id", "=", 1);
        let query = Account::query().filter_and(vec![crate::filter::exists(inner).into()]);
        let (sql, args) = build(query);
        assert_eq!(
            sql,
            "SELECT * FROM \"account\" WHERE ( EXISTS (SELECT * FROM \"account\" WHERE \"group_id\" = $1) )"
        );
        assert_eq!(args, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn test_insert_zero_pk_omitted() {
        let account = Account {
            id: 0,
            email: "a@b.c".to_string(),
            group_id: 4,
        };
        let mut map = account.to_row();
        let descriptor = descriptor::<Account>();
        if let Some(pk) = descriptor.primary_column {
            if map.get(pk).is_some_and(SqlValue::is_zero) {
                map.remove(pk);
            }
        }
        let columns: Vec<String> = descriptor
            .columns
            .iter()
            .filter(|column| map.contains(column.name))
            .map(|column| column.name.to_string())
            .collect();
        let state = Account::query().into_state();
        let (sql, args) = TestDialect.build_insert(&state, &map, &columns).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"account\" (\"email\",\"group_id\") VALUES ($1,$2)"
        );
        assert_eq!(
            args,
            vec![SqlValue::Text("a@b.c".to_string()), SqlValue::Int(4)]
        );
    }

    #[test]
    fn test_update_set_args_precede_where_args() {
        let state = Account::query().filter("id", "=", 9).into_state();
        let row = RowMap::new().with("email", "new@b.c");
        let (sql, args) = TestDialect
            .build_update(&state, &row, &["email".to_string()])
            .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"account\" SET \"email\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(
            args,
            vec![SqlValue::Text("new@b.c".to_string()), SqlValue::Int(9)]
        );
    }
}
