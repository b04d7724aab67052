//! PostgreSQL dialect: `$N` placeholders, double-quote identifiers, and the
//! SERIAL family for integer primary keys.

use sable::{ColumnDef, ColumnKind, Dialect, OrmError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn column_type(&self, column: &ColumnDef) -> Result<String> {
        if let Some(sql_type) = column.type_override {
            return Ok(sql_type.to_string());
        }

        let primary = if column.primary_key { " PRIMARY KEY" } else { "" };
        let null_part = if column.null { " NULL" } else { " NOT NULL" };

        let (base, mut tail) = match column.kind {
            ColumnKind::Bool => ("BOOLEAN".to_string(), null_part.to_string()),
            ColumnKind::TinyInt | ColumnKind::SmallInt => (
                pick(column.primary_key, "SMALLSERIAL", "SMALLINT"),
                null_part.to_string(),
            ),
            ColumnKind::Int => (
                pick(column.primary_key, "SERIAL", "INTEGER"),
                null_part.to_string(),
            ),
            ColumnKind::BigInt => (
                pick(column.primary_key, "BIGSERIAL", "BIGINT"),
                null_part.to_string(),
            ),
            ColumnKind::Float => ("REAL".to_string(), null_part.to_string()),
            ColumnKind::Double => ("DOUBLE PRECISION".to_string(), null_part.to_string()),
            ColumnKind::Text => (
                match column.max_length {
                    Some(length) => format!("VARCHAR({length})"),
                    None => "TEXT".to_string(),
                },
                null_part.to_string(),
            ),
            ColumnKind::Timestamp => (
                if column.with_time_zone {
                    "TIMESTAMP WITH TIME ZONE".to_string()
                } else {
                    "TIMESTAMP WITHOUT TIME ZONE".to_string()
                },
                null_part.to_string(),
            ),
            ColumnKind::ForeignKey { related } => {
                let related = related();
                let pk = related.primary_column_def().ok_or_else(|| {
                    OrmError::MissingPrimaryKey(related.table.clone())
                })?;
                let referenced = self.column_type(pk)?;
                // The referenced type loses its own key/null parts; a SERIAL
                // key stores as its plain integer type.
                let base = match referenced.split_whitespace().next().unwrap_or_default() {
                    "BIGSERIAL" => "BIGINT".to_string(),
                    "SMALLSERIAL" => "SMALLINT".to_string(),
                    "SERIAL" => "INTEGER".to_string(),
                    other => other.to_string(),
                };
                let mut tail = format!(
                    "{null_part} REFERENCES {} ({})",
                    self.quote_identifier(&related.table),
                    self.quote_identifier(pk.name)
                );
                if let Some(action) = column.on_update {
                    tail.push_str(" ON UPDATE ");
                    tail.push_str(action.as_sql());
                }
                if let Some(action) = column.on_delete {
                    tail.push_str(" ON DELETE ");
                    tail.push_str(action.as_sql());
                }
                (base, tail)
            }
            ColumnKind::OneToMany { .. } => {
                return Err(OrmError::Conversion(format!(
                    "column '{}' is virtual and has no storage type",
                    column.name
                )))
            }
        };

        if let Some(default) = column.default_sql {
            tail.push_str(" DEFAULT ");
            tail.push_str(default);
        }
        if column.unique {
            tail.push_str(" UNIQUE");
        }

        Ok(format!("{base}{primary}{tail}"))
    }
}

fn pick(primary_key: bool, serial: &str, plain: &str) -> String {
    if primary_key { serial } else { plain }.to_string()
}
