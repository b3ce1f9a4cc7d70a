//! Sync operation entity - The durable operation queue.
//!
//! Each row is one intended remote mutation. Rows are processed in ascending
//! `id` order, which is the queue's FIFO guarantee.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Queue operation database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_operations")]
pub struct Model {
    /// Queue id, also the processing order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// `"create"`, `"update"` or `"delete"`
    pub op_type: String,
    /// `"budget"`, `"category"`, `"transaction"` or `"notification"`
    pub entity: String,
    /// Local record the operation was staged from
    #[sea_orm(indexed)]
    pub local_id: Option<i64>,
    /// Request payload; includes the remote `id` for update/delete
    pub data: Json,
    /// When the operation was queued
    pub timestamp: DateTimeUtc,
    /// `"pending"`, `"syncing"`, `"completed"` or `"failed"`
    #[sea_orm(indexed)]
    pub status: String,
    /// Failed attempts so far
    pub retries: i32,
    /// Message from the most recent failure
    pub last_error: Option<String>,
}

/// `SyncOperation` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
