//! Migration runner tests against an in-memory SQLite database.

use std::sync::Once;

use futures::future::BoxFuture;
use sable::{
    migrate_down, migrate_up, ColumnDef, ColumnKind, Migration, Model, Result, RowMap, SqlValue,
    TableCreateOptions, TableDropOptions,
};
use sable_sqlite::SqliteDialect;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

static INIT: Once = Once::new();

async fn pool() -> AnyPool {
    INIT.call_once(|| {
        sqlx::any::install_default_drivers();
        sable::set_dialect(SqliteDialect);
    });
    AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

#[derive(Debug, Clone, Default)]
struct Alpha {
    id: i64,
}

impl Model for Alpha {
    fn columns() -> Vec<ColumnDef> {
        vec![ColumnDef::new("id", ColumnKind::BigInt).primary_key()]
    }

    fn to_row(&self) -> RowMap {
        RowMap::new().with("id", self.id)
    }

    fn from_row(row: &RowMap) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id"),
        })
    }

    fn pk(&self) -> SqlValue {
        SqlValue::Int(self.id)
    }
}

#[derive(Debug, Clone, Default)]
struct Beta {
    id: i64,
}

impl Model for Beta {
    fn columns() -> Vec<ColumnDef> {
        vec![ColumnDef::new("id", ColumnKind::BigInt).primary_key()]
    }

    fn to_row(&self) -> RowMap {
        RowMap::new().with("id", self.id)
    }

    fn from_row(row: &RowMap) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id"),
        })
    }

    fn pk(&self) -> SqlValue {
        SqlValue::Int(self.id)
    }
}

struct CreateAlpha;

impl Migration for CreateAlpha {
    fn name(&self) -> &str {
        "create_alpha"
    }

    fn up<'a>(&'a self, pool: &'a AnyPool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Alpha::query()
                .table_create(pool, TableCreateOptions { if_not_exists: true })
                .await
        })
    }

    fn down<'a>(&'a self, pool: &'a AnyPool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Alpha::query()
                .table_drop(pool, TableDropOptions { if_exists: true })
                .await
        })
    }
}

struct CreateBeta;

impl Migration for CreateBeta {
    fn name(&self) -> &str {
        "create_beta"
    }

    fn up<'a>(&'a self, pool: &'a AnyPool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Beta::query()
                .table_create(pool, TableCreateOptions { if_not_exists: true })
                .await
        })
    }

    fn down<'a>(&'a self, pool: &'a AnyPool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Beta::query()
                .table_drop(pool, TableDropOptions { if_exists: true })
                .await
        })
    }
}

fn migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(CreateAlpha), Box::new(CreateBeta)]
}

#[tokio::test]
async fn test_migrate_up_runs_all_pending() {
    let pool = pool().await;
    let logs = migrate_up(&pool, &migrations()).await.unwrap();
    assert_eq!(
        logs,
        vec![
            "Migrating up to create_alpha...",
            "Migrating up to create_beta...",
        ]
    );

    // Both tables are usable afterwards.
    Alpha::query()
        .insert_map(&pool, RowMap::new().with("id", 7i64))
        .await
        .unwrap();
    assert_eq!(Alpha::query().count(&pool).await.unwrap(), 1);
    assert_eq!(Beta::query().count(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_migrate_up_is_idempotent() {
    let pool = pool().await;
    migrate_up(&pool, &migrations()).await.unwrap();
    let logs = migrate_up(&pool, &migrations()).await.unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_migrate_down_reverses_in_order() {
    let pool = pool().await;
    migrate_up(&pool, &migrations()).await.unwrap();

    let logs = migrate_down(&pool, &migrations()).await.unwrap();
    assert_eq!(
        logs,
        vec![
            "Migrating down to create_beta...",
            "Migrating down to create_alpha...",
        ]
    );

    // A fresh up run starts over from the beginning.
    let logs = migrate_up(&pool, &migrations()).await.unwrap();
    assert_eq!(logs.len(), 2);
}

#[tokio::test]
async fn test_migrate_down_without_history_is_a_no_op() {
    let pool = pool().await;
    let logs = migrate_down(&pool, &migrations()).await.unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_partial_up_resumes_after_new_migrations_are_added() {
    let pool = pool().await;
    let first: Vec<Box<dyn Migration>> = vec![Box::new(CreateAlpha)];
    let logs = migrate_up(&pool, &first).await.unwrap();
    assert_eq!(logs.len(), 1);

    let logs = migrate_up(&pool, &migrations()).await.unwrap();
    assert_eq!(logs, vec!["Migrating up to create_beta..."]);
}
