//! Database configuration module.
//!
//! Handles the `SQLite` connection and table creation using `SeaORM`. Tables
//! are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust
//! structs. Secondary indexes (`user_id`, `synced`, queue `status`) come from
//! the `#[sea_orm(indexed)]` column attributes.

use crate::entities::{LocalRecord, SyncOperation};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info, instrument};

/// Default local database file, used when neither config nor environment set one
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/budget_sync.sqlite?mode=rwc";

/// Establishes a connection to the `SQLite` database at `database_url`.
#[instrument]
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to local store");
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates the local record and operation queue tables (and their indexes)
/// if they do not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut record_table = schema.create_table_from_entity(LocalRecord);
    let mut operation_table = schema.create_table_from_entity(SyncOperation);
    record_table.if_not_exists();
    operation_table.if_not_exists();
    db.execute(builder.build(&record_table)).await?;
    db.execute(builder.build(&operation_table)).await?;

    for mut index in schema
        .create_index_from_entity(LocalRecord)
        .into_iter()
        .chain(schema.create_index_from_entity(SyncOperation))
    {
        index.if_not_exists();
        db.execute(builder.build(&index)).await?;
    }

    info!("Local store tables ensured");
    Ok(())
}

/// Connects and ensures the schema in one step; what the binary calls at startup.
pub async fn init_db(database_url: &str) -> Result<DatabaseConnection> {
    let db = create_connection(database_url).await?;
    create_tables(&db).await?;
    Ok(db)
}
