//! An async ORM over `sqlx`'s `Any` driver.
//!
//! Models declare their schema explicitly, queries are built with a
//! consuming chain and rendered per dialect, and relations load in batches.
//! The dialect implementations live in their own crates (`sable-postgres`,
//! `sable-mysql`, `sable-sqlite`).
//!
//! Call `sqlx::any::install_default_drivers()` once before opening a pool,
//! and [`set_dialect`] to pick the process-wide default dialect.
//!
//! ```no_run
//! use sable::{ColumnDef, ColumnKind, Model, Result, RowMap, SqlValue};
//!
//! #[derive(Debug, Clone, Default)]
//! struct User {
//!     id: i64,
//!     email: String,
//! }
//!
//! impl Model for User {
//!     fn columns() -> Vec<ColumnDef> {
//!         vec![
//!             ColumnDef::new("id", ColumnKind::BigInt).primary_key(),
//!             ColumnDef::new("email", ColumnKind::Text).max_length(255),
//!         ]
//!     }
//!
//!     fn to_row(&self) -> RowMap {
//!         RowMap::new()
//!             .with("id", self.id)
//!             .with("email", self.email.as_str())
//!     }
//!
//!     fn from_row(row: &RowMap) -> Result<Self> {
//!         Ok(Self {
//!             id: row.get_i64("id"),
//!             email: row.get_string("email"),
//!         })
//!     }
//!
//!     fn pk(&self) -> SqlValue {
//!         SqlValue::Int(self.id)
//!     }
//! }
//! ```

pub mod dialect;
pub mod error;
pub mod filter;
pub mod fragment;
pub mod migrate;
pub mod query;
pub mod relation;
pub mod schema;
pub mod value;

pub use dialect::{
    default_dialect, set_dialect, Dialect, JoinClause, JoinDirection, QueryState,
    TableCreateOptions, TableDropOptions,
};
pub use error::{OrmError, Result};
pub use filter::{
    and, exists, not_exists, or, q, FilterArg, FilterClause, IntoLeftOperand, IntoRightOperand,
    Operand, OPERATORS,
};
pub use fragment::{alias, column, param, raw, sql, ColumnRef, RawSql, SelectExpr, SqlWithParams};
pub use migrate::{migrate_down, migrate_up, Migration, MigrationLog};
pub use query::Query;
pub use relation::{
    ForeignKey, NullForeignKey, OneToMany, RelatedRows, Relation, RelationKind, RelationLoader,
};
pub use schema::{
    descriptor, descriptor_with, ColumnDef, ColumnKind, Model, ModelConfig, ModelDescriptor,
    ReferentialAction, RowMap,
};
pub use value::{SqlValue, ToSqlValue, DATETIME_FORMAT};
