//! SQLite dialect: backtick identifiers, `?` placeholders, and SQLite's
//! small set of storage classes. Integer primary keys alias the rowid.

use sable::{ColumnDef, ColumnKind, Dialect, OrmError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn identifier_quote(&self) -> char {
        '`'
    }

    fn supports_delete_order_by(&self) -> bool {
        true
    }

    fn supports_delete_limit(&self) -> bool {
        true
    }

    fn supports_update_order_by(&self) -> bool {
        true
    }

    fn supports_update_limit(&self) -> bool {
        true
    }

    fn column_type(&self, column: &ColumnDef) -> Result<String> {
        if let Some(sql_type) = column.type_override {
            return Ok(sql_type.to_string());
        }

        let primary = if column.primary_key { " PRIMARY KEY" } else { "" };
        let null_part = if column.null { " NULL" } else { " NOT NULL" };

        let (base, mut tail) = match column.kind {
            ColumnKind::Bool => ("BOOLEAN".to_string(), null_part.to_string()),
            ColumnKind::TinyInt
            | ColumnKind::SmallInt
            | ColumnKind::Int
            | ColumnKind::BigInt => ("INTEGER".to_string(), null_part.to_string()),
            ColumnKind::Float | ColumnKind::Double => {
                ("REAL".to_string(), null_part.to_string())
            }
            ColumnKind::Text => ("TEXT".to_string(), null_part.to_string()),
            ColumnKind::Timestamp => ("DATETIME".to_string(), null_part.to_string()),
            ColumnKind::ForeignKey { related } => {
                let related = related();
                let pk = related.primary_column_def().ok_or_else(|| {
                    OrmError::MissingPrimaryKey(related.table.clone())
                })?;
                let referenced = self.column_type(pk)?;
                let base = referenced
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
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

#[cfg(test)]
mod tests {
    use super::*;
    use sable::{Model, RowMap, SqlValue, TableCreateOptions};

    #[derive(Debug, Clone, Default)]
    struct TestModel {
        test_id: i64,
        test_value_1: String,
    }

    impl Model for TestModel {
        fn columns() -> Vec<ColumnDef> {
            vec![
                ColumnDef::new("test_id", ColumnKind::BigInt).primary_key(),
                ColumnDef::new("test_value_1", ColumnKind::Text).max_length(100),
            ]
        }

        fn to_row(&self) -> RowMap {
            RowMap::new()
                .with("test_id", self.test_id)
                .with("test_value_1", self.test_value_1.as_str())
        }

        fn from_row(row: &RowMap) -> Result<Self> {
            Ok(Self {
                test_id: row.get_i64("test_id"),
                test_value_1: row.get_string("test_value_1"),
            })
        }

        fn pk(&self) -> SqlValue {
            SqlValue::Int(self.test_id)
        }
    }

    fn column_type(def: ColumnDef) -> String {
        SqliteDialect.column_type(&def).unwrap()
    }

    #[test]
    fn test_select_with_filter() {
        let state = TestModel::query().filter("test_id", "=", 1).into_state();
        let (sql, args) = SqliteDialect.build_select(&state).unwrap();
        assert_eq!(sql, "SELECT * FROM `testmodel` WHERE `test_id` = ?");
        assert_eq!(args, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn test_table_create() {
        let state = TestModel::query().into_state();
        let sql = SqliteDialect
            .build_table_create(&state, TableCreateOptions { if_not_exists: true })
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS `testmodel` (\n\t`test_id` INTEGER PRIMARY KEY NOT NULL,\n\t`test_value_1` TEXT NOT NULL\n)"
        );
    }

    #[test]
    fn test_column_types() {
        assert_eq!(
            column_type(ColumnDef::new("test_id", ColumnKind::BigInt).primary_key()),
            "INTEGER PRIMARY KEY NOT NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("tiny", ColumnKind::TinyInt)),
            "INTEGER NOT NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("ratio", ColumnKind::Float)),
            "REAL NOT NULL"
        );
        // max_length is ignored; SQLite has no sized text type.
        assert_eq!(
            column_type(ColumnDef::new("name", ColumnKind::Text).max_length(100)),
            "TEXT NOT NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("seen_at", ColumnKind::Timestamp).null()),
            "DATETIME NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("fk", ColumnKind::foreign_key::<TestModel>())),
            "INTEGER NOT NULL REFERENCES `testmodel` (`test_id`)"
        );
    }

    #[test]
    fn test_delete_supports_order_by_and_limit() {
        let state = TestModel::query()
            .sort(&["test_id"])
            .limit(1)
            .into_state();
        let (sql, args) = SqliteDialect.build_delete(&state).unwrap();
        assert_eq!(
            sql,
            "DELETE FROM `testmodel` ORDER BY `test_id` ASC LIMIT ?"
        );
        assert_eq!(args, vec![SqlValue::Int(1)]);
    }
}
