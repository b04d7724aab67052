//! Linear migrations with a database-backed log.
//!
//! Migrations run in list order. Every applied step inserts a row in the
//! `migrationlog` table; on the next run the latest row is matched by name
//! against the list to decide where to resume. A `down` row means that
//! migration was rolled back, so an up run starts at that position again.

use chrono::{NaiveDateTime, Utc};
use futures::future::BoxFuture;
use sqlx::AnyPool;
use tracing::{info, warn};

use crate::dialect::TableCreateOptions;
use crate::error::{OrmError, Result};
use crate::schema::{ColumnDef, ColumnKind, Model, RowMap};
use crate::value::SqlValue;

/// One reversible schema change.
pub trait Migration: Send + Sync {
    /// Stable identifier recorded in the log. Renaming a migration breaks
    /// resume detection for databases that already ran it.
    fn name(&self) -> &str;

    fn up<'a>(&'a self, pool: &'a AnyPool) -> BoxFuture<'a, Result<()>>;

    fn down<'a>(&'a self, pool: &'a AnyPool) -> BoxFuture<'a, Result<()>>;
}

/// A row in the migration log table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationLog {
    pub id: i64,
    pub created_at: Option<NaiveDateTime>,
    pub direction: String,
    pub migration_type: String,
}

impl Model for MigrationLog {
    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnKind::BigInt).primary_key(),
            ColumnDef::new("created_at", ColumnKind::Timestamp).null(),
            ColumnDef::new("direction", ColumnKind::Text).max_length(10),
            ColumnDef::new("migration_type", ColumnKind::Text).max_length(255),
        ]
    }

    fn to_row(&self) -> RowMap {
        RowMap::new()
            .with("id", self.id)
            .with("created_at", self.created_at)
            .with("direction", self.direction.as_str())
            .with("migration_type", self.migration_type.as_str())
    }

    fn from_row(row: &RowMap) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id"),
            created_at: row.get_timestamp("created_at"),
            direction: row.get_string("direction"),
            migration_type: row.get_string("migration_type"),
        })
    }

    fn pk(&self) -> SqlValue {
        SqlValue::Int(self.id)
    }
}

/// Creates the log table when absent and locates the latest applied
/// migration in `migrations`, or -1 when none applies.
async fn setup(pool: &AnyPool, migrations: &[Box<dyn Migration>]) -> Result<i64> {
    MigrationLog::query()
        .table_create(pool, TableCreateOptions { if_not_exists: true })
        .await?;

    let latest = match MigrationLog::query().sort(&["-id"]).first(pool).await {
        Ok(latest) => latest,
        Err(OrmError::NotFound) => return Ok(-1),
        Err(err) => return Err(err),
    };

    for (index, migration) in migrations.iter().enumerate() {
        if latest.migration_type == migration.name() {
            return Ok(if latest.direction == "down" {
                index as i64 - 1
            } else {
                index as i64
            });
        }
    }
    Ok(-1)
}

async fn record(pool: &AnyPool, direction: &str, name: &str) -> Result<()> {
    let entry = MigrationLog {
        id: 0,
        created_at: Some(Utc::now().naive_utc()),
        direction: direction.to_string(),
        migration_type: name.to_string(),
    };
    MigrationLog::query().insert(pool, &entry).await?;
    Ok(())
}

fn failed(name: &str, logs: Vec<String>, source: OrmError) -> OrmError {
    warn!(migration = %name, error = %source, "migration step failed");
    OrmError::Migration {
        name: name.to_string(),
        logs,
        source: Box::new(source),
    }
}

/// Applies every migration past the latest recorded one, in order. Returns
/// a human-readable log of the steps taken.
pub async fn migrate_up(pool: &AnyPool, migrations: &[Box<dyn Migration>]) -> Result<Vec<String>> {
    let latest_index = setup(pool, migrations).await?;
    let mut logs = Vec::new();

    let start = (latest_index + 1).max(0) as usize;
    for migration in &migrations[start.min(migrations.len())..] {
        let name = migration.name();
        logs.push(format!("Migrating up to {name}..."));
        info!(migration = %name, "migrating up");
        if let Err(err) = migration.up(pool).await {
            return Err(failed(name, logs, err));
        }
        if let Err(err) = record(pool, "up", name).await {
            return Err(failed(name, logs, err));
        }
    }
    Ok(logs)
}

/// Rolls back from the latest recorded migration down to the first one.
pub async fn migrate_down(
    pool: &AnyPool,
    migrations: &[Box<dyn Migration>],
) -> Result<Vec<String>> {
    let latest_index = setup(pool, migrations).await?;
    let mut logs = Vec::new();

    let mut index = latest_index;
    while index > -1 {
        let migration = &migrations[index as usize];
        let name = migration.name();
        logs.push(format!("Migrating down to {name}..."));
        info!(migration = %name, "migrating down");
        if let Err(err) = migration.down(pool).await {
            return Err(failed(name, logs, err));
        }
        if let Err(err) = record(pool, "down", name).await {
            return Err(failed(name, logs, err));
        }
        index -= 1;
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_table_name() {
        assert_eq!(MigrationLog::table(), "migrationlog");
    }

    #[test]
    fn test_log_round_trip() {
        let entry = MigrationLog {
            id: 3,
            created_at: None,
            direction: "up".to_string(),
            migration_type: "create_users".to_string(),
        };
        let restored = MigrationLog::from_row(&entry.to_row()).unwrap();
        assert_eq!(restored, entry);
    }
}
