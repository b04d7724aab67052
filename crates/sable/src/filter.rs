//! Filter clauses as a flat token sequence.
//!
//! A WHERE (or JOIN ON) condition is a list of tokens: predicates,
//! connectives, and bracket markers. Combinators produce token runs that
//! the dialect renders left to right, each token contributing a
//! space-prefixed piece of SQL.

use chrono::NaiveDateTime;

use crate::dialect::{Dialect, QueryState};
use crate::error::{OrmError, Result};
use crate::fragment::{ColumnRef, RawSql, SqlWithParams};
use crate::query::Query;
use crate::schema::Model;
use crate::value::{SqlValue, ToSqlValue};

/// Operators accepted in a predicate. Anything else is rejected at render
/// time.
pub const OPERATORS: [&str; 25] = [
    "=", "!=", "<>", "<", ">", "<=", ">=", "LIKE", "NOT LIKE", "IN", "NOT IN", "IS", "IS NOT",
    "ALL", "<> ALL", "ANY", "<> ANY", "EXISTS", "NOT EXISTS", "OVERLAPS", "?", "?&", "?|", "@>",
    "<@",
];

/// One side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A dialect-quoted column path.
    Column(String),
    /// Verbatim SQL.
    Raw(String),
    /// A parameterized fragment.
    Fragment(SqlWithParams),
    /// An embedded select; its arguments join the outer statement in place.
    Subquery(Box<QueryState>),
    /// A single bound value.
    Value(SqlValue),
    /// A list of bound values, rendered as comma-separated placeholders.
    Values(Vec<SqlValue>),
    /// The literal NULL keyword.
    Null,
}

impl Operand {
    fn render<D: Dialect + ?Sized>(&self, dialect: &D, args: &mut Vec<SqlValue>) -> Result<String> {
        match self {
            Self::Column(path) => Ok(dialect.quote_identifier(path)),
            Self::Raw(sql) => Ok(sql.clone()),
            Self::Fragment(fragment) => Ok(fragment.render(dialect, args)),
            Self::Subquery(state) => dialect.render_select(state, args),
            Self::Value(value) => {
                args.push(value.clone());
                Ok(dialect.placeholder(args.len()))
            }
            Self::Values(values) => {
                let mut parts = Vec::with_capacity(values.len());
                for value in values {
                    args.push(value.clone());
                    parts.push(dialect.placeholder(args.len()));
                }
                Ok(parts.join(","))
            }
            Self::Null => Ok("NULL".to_string()),
        }
    }

    fn render_left<D: Dialect + ?Sized>(
        &self,
        dialect: &D,
        args: &mut Vec<SqlValue>,
    ) -> Result<String> {
        match self {
            Self::Column(_) | Self::Raw(_) | Self::Fragment(_) | Self::Subquery(_) => {
                self.render(dialect, args)
            }
            Self::Value(_) | Self::Values(_) | Self::Null => {
                Err(OrmError::InvalidOperand { side: "left" })
            }
        }
    }

    /// Whether the operand is a plain value (as opposed to SQL text) for the
    /// purpose of `?&`/`?|` array wrapping.
    fn is_plain(&self) -> bool {
        !matches!(self, Self::Raw(_) | Self::Fragment(_) | Self::Subquery(_))
    }
}

/// One token in a filter sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    /// Opening bracket.
    Open,
    /// Closing bracket.
    Close,
    /// AND connective.
    And,
    /// OR connective.
    Or,
    /// A comparison.
    Predicate {
        left: Operand,
        operator: String,
        right: Operand,
    },
}

impl FilterClause {
    pub fn render<D: Dialect + ?Sized>(
        &self,
        dialect: &D,
        args: &mut Vec<SqlValue>,
    ) -> Result<String> {
        match self {
            Self::Open => Ok(" (".to_string()),
            Self::Close => Ok(" )".to_string()),
            Self::And => Ok(" AND".to_string()),
            Self::Or => Ok(" OR".to_string()),
            Self::Predicate {
                left,
                operator,
                right,
            } => {
                if !OPERATORS.contains(&operator.as_str()) {
                    return Err(OrmError::InvalidOperator(operator.clone()));
                }
                if operator == "EXISTS" || operator == "NOT EXISTS" {
                    let rendered_right = right.render(dialect, args)?;
                    return Ok(format!(" {operator} ({rendered_right})"));
                }
                let rendered_left = left.render_left(dialect, args)?;
                let rendered_right = right.render(dialect, args)?;
                match operator.as_str() {
                    "IN" | "NOT IN" | "ALL" | "<> ALL" | "ANY" | "<> ANY" => {
                        Ok(format!(" {rendered_left} {operator} ({rendered_right})"))
                    }
                    "?&" | "?|" if right.is_plain() => {
                        Ok(format!(" {rendered_left} {operator} array[{rendered_right}]"))
                    }
                    _ => Ok(format!(" {rendered_left} {operator} {rendered_right}")),
                }
            }
        }
    }
}

/// Renders a token run, appending bound values to `args`.
pub fn render_tokens<D: Dialect + ?Sized>(
    dialect: &D,
    tokens: &[FilterClause],
    args: &mut Vec<SqlValue>,
) -> Result<String> {
    let mut sql = String::new();
    for token in tokens {
        sql.push_str(&token.render(dialect, args)?);
    }
    Ok(sql)
}

/// Argument to the [`and`]/[`or`] combinators and to join conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArg {
    /// A single clause token.
    Clause(FilterClause),
    /// An already-combined token run.
    Group(Vec<FilterClause>),
    /// Explicit no-op; contributes nothing.
    Skip,
}

impl From<FilterClause> for FilterArg {
    fn from(clause: FilterClause) -> Self {
        Self::Clause(clause)
    }
}

impl From<Vec<FilterClause>> for FilterArg {
    fn from(group: Vec<FilterClause>) -> Self {
        Self::Group(group)
    }
}

pub(crate) fn flatten(args: Vec<FilterArg>) -> Vec<FilterClause> {
    let mut tokens = Vec::new();
    for arg in args {
        match arg {
            FilterArg::Clause(clause) => tokens.push(clause),
            FilterArg::Group(group) => tokens.extend(group),
            FilterArg::Skip => {}
        }
    }
    tokens
}

fn connect(connective: FilterClause, args: Vec<FilterArg>) -> Vec<FilterClause> {
    let flat = flatten(args);
    let mut depth = 0i32;
    let mut tokens = vec![FilterClause::Open];
    for (index, clause) in flat.into_iter().enumerate() {
        if index > 0 && depth == 0 {
            tokens.push(connective.clone());
        }
        match clause {
            FilterClause::Open => depth += 1,
            FilterClause::Close => depth -= 1,
            _ => {}
        }
        tokens.push(clause);
    }
    tokens.push(FilterClause::Close);
    tokens
}

/// Combines arguments with AND inside one bracket pair. Nested groups keep
/// their own brackets; the connective lands only between top-level
/// neighbors.
pub fn and(args: Vec<FilterArg>) -> Vec<FilterClause> {
    connect(FilterClause::And, args)
}

/// Combines arguments with OR inside one bracket pair.
pub fn or(args: Vec<FilterArg>) -> Vec<FilterClause> {
    connect(FilterClause::Or, args)
}

/// Builds a single predicate.
pub fn q(
    left: impl IntoLeftOperand,
    operator: impl Into<String>,
    right: impl IntoRightOperand,
) -> FilterClause {
    FilterClause::Predicate {
        left: left.into_left_operand(),
        operator: operator.into(),
        right: right.into_right_operand(),
    }
}

/// Builds an `EXISTS (...)` predicate.
pub fn exists(value: impl IntoRightOperand) -> FilterClause {
    FilterClause::Predicate {
        left: Operand::Null,
        operator: "EXISTS".to_string(),
        right: value.into_right_operand(),
    }
}

/// Builds a `NOT EXISTS (...)` predicate.
pub fn not_exists(value: impl IntoRightOperand) -> FilterClause {
    FilterClause::Predicate {
        left: Operand::Null,
        operator: "NOT EXISTS".to_string(),
        right: value.into_right_operand(),
    }
}

/// Conversion into the left side of a predicate. A bare string here is an
/// identifier, not a value.
pub trait IntoLeftOperand {
    fn into_left_operand(self) -> Operand;
}

impl IntoLeftOperand for &str {
    fn into_left_operand(self) -> Operand {
        Operand::Column(self.to_string())
    }
}

impl IntoLeftOperand for String {
    fn into_left_operand(self) -> Operand {
        Operand::Column(self)
    }
}

impl IntoLeftOperand for ColumnRef {
    fn into_left_operand(self) -> Operand {
        Operand::Column(self.path)
    }
}

impl IntoLeftOperand for RawSql {
    fn into_left_operand(self) -> Operand {
        Operand::Raw(self.sql)
    }
}

impl IntoLeftOperand for SqlWithParams {
    fn into_left_operand(self) -> Operand {
        Operand::Fragment(self)
    }
}

impl<T: Model> IntoLeftOperand for Query<'_, T> {
    fn into_left_operand(self) -> Operand {
        Operand::Subquery(Box::new(self.into_state()))
    }
}

/// Conversion into the right side of a predicate. A bare string here is a
/// bound value.
pub trait IntoRightOperand {
    fn into_right_operand(self) -> Operand;
}

macro_rules! right_operand_value {
    ($($ty:ty),*) => {
        $(
            impl IntoRightOperand for $ty {
                fn into_right_operand(self) -> Operand {
                    Operand::Value(self.to_sql_value())
                }
            }
        )*
    };
}

right_operand_value!(bool, i8, i16, i32, i64, u8, u16, u32, f32, f64, &str, String, NaiveDateTime);

impl IntoRightOperand for SqlValue {
    fn into_right_operand(self) -> Operand {
        match self {
            Self::Null => Operand::Null,
            value => Operand::Value(value),
        }
    }
}

impl<T: ToSqlValue> IntoRightOperand for Option<T> {
    fn into_right_operand(self) -> Operand {
        match self {
            Some(value) => Operand::Value(value.to_sql_value()),
            None => Operand::Null,
        }
    }
}

impl<T: ToSqlValue> IntoRightOperand for Vec<T> {
    fn into_right_operand(self) -> Operand {
        Operand::Values(self.iter().map(ToSqlValue::to_sql_value).collect())
    }
}

impl IntoRightOperand for ColumnRef {
    fn into_right_operand(self) -> Operand {
        Operand::Column(self.path)
    }
}

impl IntoRightOperand for RawSql {
    fn into_right_operand(self) -> Operand {
        Operand::Raw(self.sql)
    }
}

impl IntoRightOperand for SqlWithParams {
    fn into_right_operand(self) -> Operand {
        Operand::Fragment(self)
    }
}

impl<T: Model> IntoRightOperand for Query<'_, T> {
    fn into_right_operand(self) -> Operand {
        Operand::Subquery(Box::new(self.into_state()))
    }
}
