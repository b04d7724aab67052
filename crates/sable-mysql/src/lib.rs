//! MySQL dialect: backtick identifiers, positional `?` placeholders,
//! AUTO_INCREMENT keys, and ORDER BY / LIMIT support on UPDATE and DELETE.

use sable::{ColumnDef, ColumnKind, Dialect, OrmError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
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
            ColumnKind::TinyInt => integer(column, "TINYINT", null_part),
            ColumnKind::SmallInt => integer(column, "SMALLINT", null_part),
            ColumnKind::Int => integer(column, "INTEGER", null_part),
            ColumnKind::BigInt => integer(column, "BIGINT", null_part),
            ColumnKind::Float => ("FLOAT".to_string(), null_part.to_string()),
            ColumnKind::Double => ("DOUBLE".to_string(), null_part.to_string()),
            ColumnKind::Text => (
                match column.max_length {
                    Some(length) => format!("VARCHAR({length})"),
                    None => "TEXT".to_string(),
                },
                null_part.to_string(),
            ),
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

fn integer(column: &ColumnDef, base: &str, null_part: &str) -> (String, String) {
    if column.primary_key {
        (base.to_string(), " NOT NULL AUTO_INCREMENT".to_string())
    } else {
        (base.to_string(), null_part.to_string())
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
        MysqlDialect.column_type(&def).unwrap()
    }

    #[test]
    fn test_select_uses_backticks_and_question_marks() {
        let state = TestModel::query()
            .filter("test_id", "=", 1)
            .limit(10)
            .into_state();
        let (sql, args) = MysqlDialect.build_select(&state).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `testmodel` WHERE `test_id` = ? LIMIT ?"
        );
        assert_eq!(args, vec![SqlValue::Int(1), SqlValue::Int(10)]);
    }

    #[test]
    fn test_delete_supports_order_by_and_limit() {
        let state = TestModel::query()
            .filter("test_id", ">", 1)
            .sort(&["-test_id"])
            .limit(5)
            .into_state();
        let (sql, args) = MysqlDialect.build_delete(&state).unwrap();
        assert_eq!(
            sql,
            "DELETE FROM `testmodel` WHERE `test_id` > ? ORDER BY `test_id` DESC LIMIT ?"
        );
        assert_eq!(args, vec![SqlValue::Int(1), SqlValue::Int(5)]);
    }

    #[test]
    fn test_delete_rejects_offset() {
        let state = TestModel::query().offset(2).into_state();
        assert!(matches!(
            MysqlDialect.build_delete(&state),
            Err(OrmError::UnsupportedClause {
                statement: "DELETE",
                clause: "OFFSET",
                ..
            })
        ));
    }

    #[test]
    fn test_update_supports_order_by_and_limit() {
        let state = TestModel::query()
            .filter("test_id", ">", 1)
            .sort(&["test_id"])
            .limit(3)
            .into_state();
        let row = RowMap::new().with("test_value_1", "a");
        let (sql, args) = MysqlDialect
            .build_update(&state, &row, &["test_value_1".to_string()])
            .unwrap();
        assert_eq!(
            sql,
            "UPDATE `testmodel` SET `test_value_1` = ? WHERE `test_id` > ? ORDER BY `test_id` ASC LIMIT ?"
        );
        assert_eq!(
            args,
            vec![
                SqlValue::Text("a".to_string()),
                SqlValue::Int(1),
                SqlValue::Int(3)
            ]
        );
    }

    #[test]
    fn test_table_create_with_auto_increment_key() {
        let state = TestModel::query().into_state();
        let sql = MysqlDialect
            .build_table_create(&state, TableCreateOptions { if_not_exists: true })
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS `testmodel` (\n\t`test_id` BIGINT PRIMARY KEY NOT NULL AUTO_INCREMENT,\n\t`test_value_1` VARCHAR(100) NOT NULL\n)"
        );
    }

    #[test]
    fn test_column_types() {
        assert_eq!(
            column_type(ColumnDef::new("test_id", ColumnKind::BigInt).primary_key()),
            "BIGINT PRIMARY KEY NOT NULL AUTO_INCREMENT"
        );
        assert_eq!(
            column_type(ColumnDef::new("tiny", ColumnKind::TinyInt)),
            "TINYINT NOT NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("flag", ColumnKind::Bool).null()),
            "BOOLEAN NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("ratio", ColumnKind::Float)),
            "FLOAT NOT NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("ratio", ColumnKind::Double)),
            "DOUBLE NOT NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("seen_at", ColumnKind::Timestamp).null()),
            "DATETIME NULL"
        );
        assert_eq!(
            column_type(ColumnDef::new("name", ColumnKind::Text).max_length(50)),
            "VARCHAR(50) NOT NULL"
        );
    }

    #[test]
    fn test_foreign_key_drops_auto_increment() {
        assert_eq!(
            column_type(ColumnDef::new("fk", ColumnKind::foreign_key::<TestModel>())),
            "BIGINT NOT NULL REFERENCES `testmodel` (`test_id`)"
        );
    }
}
