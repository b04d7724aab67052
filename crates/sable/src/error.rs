//! Error types shared across the toolkit.

use thiserror::Error;

/// Errors produced while building or executing queries.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No row found where one was expected.
    #[error("row not found")]
    NotFound,

    /// A column name that the model does not declare.
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { column: String, table: String },

    /// A column was named in a write but no value was supplied for it.
    #[error("missing value for column '{column}' on {statement}")]
    MissingValue {
        column: String,
        statement: &'static str,
    },

    /// A write statement was issued with no columns at all.
    #[error("no columns provided for {statement}")]
    NoColumns { statement: &'static str },

    /// Operator outside the filter allow-list.
    #[error("invalid filter operator '{0}'")]
    InvalidOperator(String),

    /// Operand shape not usable in its position within a filter clause.
    #[error("unsupported {side}-hand operand in filter clause")]
    InvalidOperand { side: &'static str },

    /// Clause not available on the target dialect for this statement.
    #[error("{dialect} does not support {clause} on {statement}")]
    UnsupportedClause {
        statement: &'static str,
        clause: &'static str,
        dialect: &'static str,
    },

    /// The model declares no primary-key column but the operation needs one.
    #[error("table '{0}' has no primary-key column")]
    MissingPrimaryKey(String),

    /// A relation name that does not resolve to a relation column.
    #[error("invalid relation '{column}' on table '{table}'")]
    InvalidRelation { column: String, table: String },

    /// Value decode or conversion failure.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A migration step failed; the log lines gathered so far are preserved.
    #[error("migration '{name}' failed: {source}")]
    Migration {
        name: String,
        logs: Vec<String>,
        source: Box<OrmError>,
    },
}

/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, OrmError>;
