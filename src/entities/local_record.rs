//! Local record entity - One row per locally stored budget, category,
//! transaction or notification.
//!
//! The four collections share a table, discriminated by `collection`. Domain
//! fields live in the opaque JSON `payload`; the remaining columns are the
//! sync control fields. `id` is AUTOINCREMENT so it is never reused.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Local record database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "local_records")]
pub struct Model {
    /// Locally assigned, monotonically increasing key
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Collection name (`budgets`, `categories`, `transactions`, `notifications`)
    #[sea_orm(indexed)]
    pub collection: String,
    /// Owning user, when the payload has one
    #[sea_orm(indexed)]
    pub user_id: Option<i64>,
    /// Server-side id, known once a create has been acknowledged
    pub remote_id: Option<i64>,
    /// Domain fields
    pub payload: Json,
    /// False while the remote copy may be stale or missing
    #[sea_orm(indexed)]
    pub synced: bool,
    /// Created before any successful sync; reconciliation sends a create instead of an update
    pub offline_created: bool,
    /// First write
    pub created_at: DateTimeUtc,
    /// Last local write
    pub updated_at: DateTimeUtc,
    /// Last remote acknowledgment
    pub synced_at: Option<DateTimeUtc>,
}

/// Local records have no relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
