//! The dialect contract and the generic statement builders.
//!
//! A dialect supplies quoting, placeholder syntax, a column-type table, and
//! capability probes; the statement grammar itself lives here as default
//! methods so every engine renders the same shape of SQL.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{OrmError, Result};
use crate::filter::{render_tokens, FilterClause};
use crate::fragment::SelectExpr;
use crate::schema::{ColumnDef, ColumnKind, RowMap};
use crate::value::SqlValue;

/// Join directions supported by the select builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinDirection {
    fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Full => "FULL",
        }
    }
}

/// A join and its ON condition tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub direction: JoinDirection,
    pub table: String,
    pub on: Vec<FilterClause>,
}

/// Options for CREATE TABLE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCreateOptions {
    pub if_not_exists: bool,
}

/// Options for DROP TABLE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableDropOptions {
    pub if_exists: bool,
}

/// Everything a statement builder needs to know about a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub filters: Vec<FilterClause>,
    pub joins: Vec<JoinClause>,
    pub sort: Vec<String>,
    pub selected: Vec<SelectExpr>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub count: bool,
    pub fetch_related: Vec<String>,
}

impl QueryState {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }
}

fn render_sort<D: Dialect + ?Sized>(dialect: &D, sort: &[String]) -> String {
    let parts: Vec<String> = sort
        .iter()
        .map(|key| match key.strip_prefix('-') {
            Some(column) => format!("{} DESC", dialect.quote_identifier(column)),
            None => format!("{} ASC", dialect.quote_identifier(key)),
        })
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

/// A SQL dialect. Implementations override the syntax hooks and the column
/// type table; statement assembly comes from the provided methods.
pub trait Dialect: Send + Sync {
    /// Short engine name used in error messages.
    fn name(&self) -> &'static str;

    /// The identifier quote character.
    fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quotes an identifier, doubling embedded quote characters. Dotted
    /// paths quote each segment separately.
    fn quote_identifier(&self, identifier: &str) -> String {
        let quote = self.identifier_quote();
        let doubled = format!("{quote}{quote}");
        identifier
            .split('.')
            .map(|part| format!("{quote}{}{quote}", part.replace(quote, &doubled)))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Placeholder for the parameter at 1-based `position`.
    fn placeholder(&self, position: usize) -> String {
        let _ = position;
        "?".to_string()
    }

    fn supports_delete_order_by(&self) -> bool {
        false
    }

    fn supports_delete_limit(&self) -> bool {
        false
    }

    fn supports_update_order_by(&self) -> bool {
        false
    }

    fn supports_update_limit(&self) -> bool {
        false
    }

    /// The full column definition type for DDL, including primary-key,
    /// nullability, references, default, and unique parts.
    fn column_type(&self, column: &ColumnDef) -> Result<String>;

    /// Renders a select into `sql`, appending bound values to `args` so
    /// subqueries keep numbering placeholders from the outer statement.
    fn render_select(&self, state: &QueryState, args: &mut Vec<SqlValue>) -> Result<String> {
        let mut sql = String::from("SELECT ");
        if state.count {
            sql.push_str("count(*)");
        } else if state.selected.is_empty() {
            sql.push('*');
        } else {
            let parts: Vec<String> = state
                .selected
                .iter()
                .map(|expr| expr.render(self))
                .collect();
            sql.push_str(&parts.join(","));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.quote_identifier(&state.table));

        for join in &state.joins {
            sql.push(' ');
            sql.push_str(join.direction.keyword());
            sql.push_str(" JOIN ");
            sql.push_str(&self.quote_identifier(&join.table));
            if !join.on.is_empty() {
                sql.push_str(" ON");
                sql.push_str(&render_tokens(self, &join.on, args)?);
            }
        }

        if !state.filters.is_empty() {
            sql.push_str(" WHERE");
            sql.push_str(&render_tokens(self, &state.filters, args)?);
        }

        if !state.sort.is_empty() {
            sql.push_str(&render_sort(self, &state.sort));
        }

        if let Some(limit) = state.limit {
            args.push(SqlValue::Int(limit));
            sql.push_str(&format!(" LIMIT {}", self.placeholder(args.len())));
        }
        if let Some(offset) = state.offset {
            args.push(SqlValue::Int(offset));
            sql.push_str(&format!(" OFFSET {}", self.placeholder(args.len())));
        }

        Ok(sql)
    }

    fn build_select(&self, state: &QueryState) -> Result<(String, Vec<SqlValue>)> {
        let mut args = Vec::new();
        let sql = self.render_select(state, &mut args)?;
        Ok((sql, args))
    }

    fn build_insert(
        &self,
        state: &QueryState,
        row: &RowMap,
        columns: &[String],
    ) -> Result<(String, Vec<SqlValue>)> {
        if columns.is_empty() {
            return Err(OrmError::NoColumns {
                statement: "INSERT",
            });
        }
        let mut args = Vec::new();
        let mut quoted = Vec::with_capacity(columns.len());
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in columns {
            if !state.has_column(column) {
                return Err(OrmError::UnknownColumn {
                    column: column.clone(),
                    table: state.table.clone(),
                });
            }
            let value = row.get(column).ok_or_else(|| OrmError::MissingValue {
                column: column.clone(),
                statement: "INSERT",
            })?;
            args.push(value.clone());
            quoted.push(self.quote_identifier(column));
            placeholders.push(self.placeholder(args.len()));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(&state.table),
            quoted.join(","),
            placeholders.join(",")
        );
        Ok((sql, args))
    }

    fn build_update(
        &self,
        state: &QueryState,
        row: &RowMap,
        columns: &[String],
    ) -> Result<(String, Vec<SqlValue>)> {
        if columns.is_empty() {
            return Err(OrmError::NoColumns {
                statement: "UPDATE",
            });
        }
        let mut args = Vec::new();
        let mut assignments = Vec::with_capacity(columns.len());
        for column in columns {
            if !state.has_column(column) {
                return Err(OrmError::UnknownColumn {
                    column: column.clone(),
                    table: state.table.clone(),
                });
            }
            let value = row.get(column).ok_or_else(|| OrmError::MissingValue {
                column: column.clone(),
                statement: "UPDATE",
            })?;
            args.push(value.clone());
            assignments.push(format!(
                "{} = {}",
                self.quote_identifier(column),
                self.placeholder(args.len())
            ));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.quote_identifier(&state.table),
            assignments.join(",")
        );

        if !state.filters.is_empty() {
            sql.push_str(" WHERE");
            sql.push_str(&render_tokens(self, &state.filters, &mut args)?);
        }
        if !state.sort.is_empty() {
            if !self.supports_update_order_by() {
                return Err(OrmError::UnsupportedClause {
                    statement: "UPDATE",
                    clause: "ORDER BY",
                    dialect: self.name(),
                });
            }
            sql.push_str(&render_sort(self, &state.sort));
        }
        if let Some(limit) = state.limit {
            if !self.supports_update_limit() {
                return Err(OrmError::UnsupportedClause {
                    statement: "UPDATE",
                    clause: "LIMIT",
                    dialect: self.name(),
                });
            }
            args.push(SqlValue::Int(limit));
            sql.push_str(&format!(" LIMIT {}", self.placeholder(args.len())));
        }
        if state.offset.is_some() {
            return Err(OrmError::UnsupportedClause {
                statement: "UPDATE",
                clause: "OFFSET",
                dialect: self.name(),
            });
        }

        Ok((sql, args))
    }

    fn build_delete(&self, state: &QueryState) -> Result<(String, Vec<SqlValue>)> {
        let mut args = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.quote_identifier(&state.table));

        if !state.filters.is_empty() {
            sql.push_str(" WHERE");
            sql.push_str(&render_tokens(self, &state.filters, &mut args)?);
        }
        if !state.sort.is_empty() {
            if !self.supports_delete_order_by() {
                return Err(OrmError::UnsupportedClause {
                    statement: "DELETE",
                    clause: "ORDER BY",
                    dialect: self.name(),
                });
            }
            sql.push_str(&render_sort(self, &state.sort));
        }
        if let Some(limit) = state.limit {
            if !self.supports_delete_limit() {
                return Err(OrmError::UnsupportedClause {
                    statement: "DELETE",
                    clause: "LIMIT",
                    dialect: self.name(),
                });
            }
            args.push(SqlValue::Int(limit));
            sql.push_str(&format!(" LIMIT {}", self.placeholder(args.len())));
        }
        if state.offset.is_some() {
            return Err(OrmError::UnsupportedClause {
                statement: "DELETE",
                clause: "OFFSET",
                dialect: self.name(),
            });
        }

        Ok((sql, args))
    }

    fn build_table_create(&self, state: &QueryState, options: TableCreateOptions) -> Result<String> {
        let mut definitions = Vec::new();
        for column in &state.columns {
            if matches!(column.kind, ColumnKind::OneToMany { .. }) {
                continue;
            }
            definitions.push(format!(
                "{} {}",
                self.quote_identifier(column.name),
                self.column_type(column)?
            ));
        }
        let prefix = if options.if_not_exists {
            "CREATE TABLE IF NOT EXISTS "
        } else {
            "CREATE TABLE "
        };
        Ok(format!(
            "{}{} (\n\t{}\n)",
            prefix,
            self.quote_identifier(&state.table),
            definitions.join(",\n\t")
        ))
    }

    fn build_table_drop(&self, state: &QueryState, options: TableDropOptions) -> Result<String> {
        let prefix = if options.if_exists {
            "DROP TABLE IF EXISTS "
        } else {
            "DROP TABLE "
        };
        Ok(format!("{}{}", prefix, self.quote_identifier(&state.table)))
    }

    fn build_column_add(&self, state: &QueryState, column: &ColumnDef) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.quote_identifier(&state.table),
            self.quote_identifier(column.name),
            self.column_type(column)?
        ))
    }

    fn build_column_drop(&self, state: &QueryState, column: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(&state.table),
            self.quote_identifier(column)
        ))
    }
}

static DEFAULT_DIALECT: RwLock<Option<Arc<dyn Dialect>>> = RwLock::new(None);

/// Sets the process-wide default dialect. Intended to be called once at
/// startup; queries without a per-query override use this.
pub fn set_dialect(dialect: impl Dialect + 'static) {
    *DEFAULT_DIALECT
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(dialect));
}

/// Returns the process-wide default dialect.
///
/// # Panics
///
/// Panics when no dialect has been configured. Call [`set_dialect`] at
/// startup or set one per query.
pub fn default_dialect() -> Arc<dyn Dialect> {
    DEFAULT_DIALECT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(|| {
            panic!("no default dialect configured; call sable::set_dialect at startup")
        })
}
