//! Connects to the configured database and runs schema creation.
//!
//! No process-wide connection is cached behind a `OnceLock`: the
//! connection is a constructor dependency of whoever needs it, wired once
//! at the composition root in `apps/broker`.

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use sea_orm::sea_query::TableCreateStatement;

use crate::entities::{accounts, requests};

pub async fn connect(dsn: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(dsn).await
}

/// Creates the `accounts` and `requests` tables if they do not already
/// exist. Idempotent; safe to call on every startup.
pub async fn sync_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_if_missing(db, schema.create_table_from_entity(accounts::Entity)).await?;
    create_if_missing(db, schema.create_table_from_entity(requests::Entity)).await?;
    Ok(())
}

async fn create_if_missing(
    db: &DatabaseConnection,
    mut stmt: TableCreateStatement,
) -> Result<(), DbErr> {
    stmt.if_not_exists();
    let backend = db.get_database_backend();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}
