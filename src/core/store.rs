//! Persistent local store - durable, per-collection record storage.
//!
//! Every local write leaves the record `synced = false`; only the sync
//! manager flips it back after a confirmed remote acknowledgment. Storage
//! faults are returned to the caller as [`Error::Database`] and never
//! swallowed.

use crate::{
    entities::{LocalRecord, local_record},
    errors::{Error, Result},
    models::EntityKind,
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// Control fields that exist only locally and must not be sent on create
pub const LOCAL_ONLY_FIELDS: [&str; 6] = [
    "id",
    "synced",
    "offline_created",
    "created_at",
    "updated_at",
    "synced_at",
];

/// What a caller hands to [`LocalStore::put`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInput {
    /// Existing local id to overwrite; `None` inserts a new record
    pub id: Option<i64>,
    /// Owning user, for the `user_id` index
    pub user_id: Option<i64>,
    /// Server id, if the record already exists remotely
    pub remote_id: Option<i64>,
    /// Whether the write happens while offline / before any sync
    pub offline_created: bool,
    /// Domain fields
    pub payload: Value,
}

impl RecordInput {
    /// A brand-new record created while offline
    #[must_use]
    pub fn offline(user_id: Option<i64>, payload: Value) -> Self {
        Self {
            id: None,
            user_id,
            remote_id: None,
            offline_created: true,
            payload,
        }
    }

    /// A local copy of a record the server already knows about
    #[must_use]
    pub fn known_remote(user_id: Option<i64>, remote_id: i64, payload: Value) -> Self {
        Self {
            id: None,
            user_id,
            remote_id: Some(remote_id),
            offline_created: false,
            payload,
        }
    }
}

/// A stored record with its control fields
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecordView {
    /// Local id
    pub id: i64,
    /// Entity kind of the owning collection
    pub kind: EntityKind,
    /// Owning user
    pub user_id: Option<i64>,
    /// Server id, once known
    pub remote_id: Option<i64>,
    /// Domain fields
    pub payload: Value,
    /// Remote copy is current
    pub synced: bool,
    /// Created before any sync
    pub offline_created: bool,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Last local write
    pub updated_at: DateTime<Utc>,
    /// Last acknowledgment
    pub synced_at: Option<DateTime<Utc>>,
}

impl LocalRecordView {
    /// Flattens payload and control fields into one JSON object, the way the
    /// record looks to UI code.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = match &self.payload {
            Value::Object(fields) => fields.clone(),
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("value".to_string(), other.clone());
                wrapped
            }
        };
        map.insert("id".to_string(), Value::from(self.id));
        map.insert("synced".to_string(), Value::from(self.synced));
        map.insert("offline_created".to_string(), Value::from(self.offline_created));
        map.insert("created_at".to_string(), Value::from(self.created_at.to_rfc3339()));
        map.insert("updated_at".to_string(), Value::from(self.updated_at.to_rfc3339()));
        map.insert(
            "synced_at".to_string(),
            self.synced_at
                .map_or(Value::Null, |t| Value::from(t.to_rfc3339())),
        );
        Value::Object(map)
    }
}

impl TryFrom<local_record::Model> for LocalRecordView {
    type Error = Error;

    fn try_from(model: local_record::Model) -> Result<Self> {
        let kind = EntityKind::from_collection(&model.collection).ok_or_else(|| {
            Error::corrupt(format!(
                "record {} has unknown collection '{}'",
                model.id, model.collection
            ))
        })?;
        Ok(Self {
            id: model.id,
            kind,
            user_id: model.user_id,
            remote_id: model.remote_id,
            payload: model.payload,
            synced: model.synced,
            offline_created: model.offline_created,
            created_at: model.created_at,
            updated_at: model.updated_at,
            synced_at: model.synced_at,
        })
    }
}

/// Removes the local-only control fields from a flattened record.
#[must_use]
pub fn strip_local_fields(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        for field in LOCAL_ONLY_FIELDS {
            map.remove(field);
        }
    }
    value
}

/// Record storage over the `local_records` table
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: DatabaseConnection,
}

impl LocalStore {
    /// Wraps an open connection whose tables already exist
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Underlying connection
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn find_model(&self, kind: EntityKind, id: i64) -> Result<Option<local_record::Model>> {
        LocalRecord::find_by_id(id)
            .filter(local_record::Column::Collection.eq(kind.collection()))
            .one(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Inserts or overwrites a record and returns its local id.
    ///
    /// The record always ends up `synced = false` with a fresh `updated_at`.
    /// `offline_created` is sticky: an overwrite never clears it.
    #[instrument(skip(self, input), fields(collection = kind.collection()))]
    pub async fn put(&self, kind: EntityKind, input: RecordInput) -> Result<i64> {
        let now = Utc::now();

        if let Some(id) = input.id {
            let existing = self
                .find_model(kind, id)
                .await?
                .ok_or_else(|| Error::RecordNotFound {
                    collection: kind.collection().to_string(),
                    id,
                })?;
            let offline_created = existing.offline_created || input.offline_created;
            let remote_id = input.remote_id.or(existing.remote_id);

            let mut active: local_record::ActiveModel = existing.into();
            active.user_id = Set(input.user_id);
            active.remote_id = Set(remote_id);
            active.payload = Set(input.payload);
            active.synced = Set(false);
            active.offline_created = Set(offline_created);
            active.updated_at = Set(now);
            let updated = active.update(&self.db).await?;
            debug!(id = updated.id, "Local record overwritten");
            return Ok(updated.id);
        }

        let record = local_record::ActiveModel {
            collection: Set(kind.collection().to_string()),
            user_id: Set(input.user_id),
            remote_id: Set(input.remote_id),
            payload: Set(input.payload),
            synced: Set(false),
            offline_created: Set(input.offline_created),
            created_at: Set(now),
            updated_at: Set(now),
            synced_at: Set(None),
            ..Default::default()
        };
        let inserted = record.insert(&self.db).await?;
        debug!(id = inserted.id, "Local record inserted");
        Ok(inserted.id)
    }

    /// Fetches one record by local id; records of other collections are not visible.
    pub async fn get(&self, kind: EntityKind, id: i64) -> Result<Option<LocalRecordView>> {
        self.find_model(kind, id)
            .await?
            .map(LocalRecordView::try_from)
            .transpose()
    }

    /// Lists a collection, optionally narrowed to one user.
    pub async fn list(&self, kind: EntityKind, user_id: Option<i64>) -> Result<Vec<LocalRecordView>> {
        let mut query =
            LocalRecord::find().filter(local_record::Column::Collection.eq(kind.collection()));
        if let Some(user_id) = user_id {
            query = query.filter(local_record::Column::UserId.eq(user_id));
        }
        query
            .order_by_asc(local_record::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(LocalRecordView::try_from)
            .collect()
    }

    /// Marks a record as acknowledged by the remote. No-op when the record is
    /// absent or already synced.
    pub async fn mark_synced(&self, kind: EntityKind, id: i64) -> Result<()> {
        let Some(model) = self.find_model(kind, id).await? else {
            return Ok(());
        };
        if model.synced {
            return Ok(());
        }

        let mut active: local_record::ActiveModel = model.into();
        active.synced = Set(true);
        active.synced_at = Set(Some(Utc::now()));
        active.update(&self.db).await?;
        Ok(())
    }

    /// Records the server id learned from a create acknowledgment.
    pub async fn set_remote_id(&self, kind: EntityKind, id: i64, remote_id: i64) -> Result<()> {
        let Some(model) = self.find_model(kind, id).await? else {
            return Ok(());
        };
        let mut active: local_record::ActiveModel = model.into();
        active.remote_id = Set(Some(remote_id));
        active.update(&self.db).await?;
        Ok(())
    }

    /// Every record of the collection still waiting for a remote acknowledgment.
    pub async fn list_unsynced(&self, kind: EntityKind) -> Result<Vec<LocalRecordView>> {
        LocalRecord::find()
            .filter(local_record::Column::Collection.eq(kind.collection()))
            .filter(local_record::Column::Synced.eq(false))
            .order_by_asc(local_record::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(LocalRecordView::try_from)
            .collect()
    }

    /// Deletes one record. Returns whether anything was removed.
    pub async fn remove(&self, kind: EntityKind, id: i64) -> Result<bool> {
        let result = LocalRecord::delete_many()
            .filter(local_record::Column::Id.eq(id))
            .filter(local_record::Column::Collection.eq(kind.collection()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Wipes a whole collection; only for logout/reset.
    #[instrument(skip(self), fields(collection = kind.collection()))]
    pub async fn clear(&self, kind: EntityKind) -> Result<u64> {
        let result = LocalRecord::delete_many()
            .filter(local_record::Column::Collection.eq(kind.collection()))
            .exec(&self.db)
            .await?;
        debug!(removed = result.rows_affected, "Collection cleared");
        Ok(result.rows_affected)
    }
}
