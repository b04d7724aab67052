//! SQL fragments: quoted columns, raw text, aliases, and parameterized
//! snippets that can be embedded in filters and select lists.

use crate::dialect::Dialect;
use crate::value::{SqlValue, ToSqlValue};

/// Verbatim SQL text. Nothing is escaped; the caller is responsible for the
/// content.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSql {
    pub sql: String,
}

/// Builds a [`RawSql`] fragment.
pub fn raw(sql: impl Into<String>) -> RawSql {
    RawSql { sql: sql.into() }
}

/// A column reference quoted per dialect. Dotted paths quote each segment,
/// so `"accounts.id"` renders as `"accounts"."id"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub path: String,
}

impl ColumnRef {
    pub fn render<D: Dialect + ?Sized>(&self, dialect: &D) -> String {
        dialect.quote_identifier(&self.path)
    }
}

/// Builds a [`ColumnRef`].
pub fn column(path: impl Into<String>) -> ColumnRef {
    ColumnRef { path: path.into() }
}

/// One piece of a parameterized fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlSegment {
    /// Text emitted verbatim.
    Text(String),
    /// A bound parameter; renders as the dialect placeholder.
    Param(SqlValue),
}

impl From<&str> for SqlSegment {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for SqlSegment {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Builds a parameter segment.
pub fn param(value: impl ToSqlValue) -> SqlSegment {
    SqlSegment::Param(value.to_sql_value())
}

/// Interleaved SQL text and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlWithParams {
    pub segments: Vec<SqlSegment>,
}

impl SqlWithParams {
    /// Renders the fragment, appending bound values to `args` and numbering
    /// placeholders from the current argument count.
    pub fn render<D: Dialect + ?Sized>(&self, dialect: &D, args: &mut Vec<SqlValue>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                SqlSegment::Text(text) => out.push_str(text),
                SqlSegment::Param(value) => {
                    args.push(value.clone());
                    out.push_str(&dialect.placeholder(args.len()));
                }
            }
        }
        out
    }
}

/// Builds a [`SqlWithParams`] from segments.
pub fn sql(segments: Vec<SqlSegment>) -> SqlWithParams {
    SqlWithParams { segments }
}

/// An expression in a select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectExpr {
    /// A quoted column.
    Column(String),
    /// Verbatim SQL.
    Raw(String),
    /// `expr AS "alias"`; aliases nest.
    Alias {
        expr: Box<SelectExpr>,
        alias: String,
    },
}

impl SelectExpr {
    pub fn render<D: Dialect + ?Sized>(&self, dialect: &D) -> String {
        match self {
            Self::Column(path) => dialect.quote_identifier(path),
            Self::Raw(sql) => sql.clone(),
            Self::Alias { expr, alias } => format!(
                "{} AS {}",
                expr.render(dialect),
                dialect.quote_identifier(alias)
            ),
        }
    }
}

impl From<&str> for SelectExpr {
    fn from(path: &str) -> Self {
        Self::Column(path.to_string())
    }
}

impl From<String> for SelectExpr {
    fn from(path: String) -> Self {
        Self::Column(path)
    }
}

impl From<ColumnRef> for SelectExpr {
    fn from(column: ColumnRef) -> Self {
        Self::Column(column.path)
    }
}

impl From<RawSql> for SelectExpr {
    fn from(raw: RawSql) -> Self {
        Self::Raw(raw.sql)
    }
}

/// Builds an aliased select expression.
pub fn alias(expr: impl Into<SelectExpr>, name: impl Into<String>) -> SelectExpr {
    SelectExpr::Alias {
        expr: Box::new(expr.into()),
        alias: name.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDialect;

    #[test]
    fn test_column_quoting() {
        assert_eq!(column("id").render(&TestDialect), "\"id\"");
        assert_eq!(
            column("accounts.id").render(&TestDialect),
            "\"accounts\".\"id\""
        );
        assert_eq!(column("x\"").render(&TestDialect), "\"x\"\"\"");
    }

    #[test]
    fn test_alias_rendering() {
        let expr = alias("x", "y");
        assert_eq!(expr.render(&TestDialect), "\"x\" AS \"y\"");

        let nested = alias(alias("x", "y"), "alias2");
        assert_eq!(nested.render(&TestDialect), "\"x\" AS \"y\" AS \"alias2\"");
    }

    #[test]
    fn test_sql_with_params() {
        let fragment = sql(vec![param(1), ",".into(), param(2)]);
        let mut args = Vec::new();
        assert_eq!(fragment.render(&TestDialect, &mut args), "$1,$2");
        assert_eq!(args, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_param_numbering_continues() {
        let fragment = sql(vec!["lower(".into(), param("A"), ")".into()]);
        let mut args = vec![SqlValue::Int(9)];
        assert_eq!(fragment.render(&TestDialect, &mut args), "lower($2)");
        assert_eq!(args.len(), 2);
    }
}
