//! Operation queue - FIFO log of intended remote mutations.
//!
//! The queue is independent of the local store: an operation may describe a
//! record that no longer exists locally (deletes) or was never stored.
//! Pending operations are always returned in ascending id order, which is the
//! causal order they were queued in.

use crate::{
    entities::{SyncOperation, sync_operation},
    errors::{Error, Result},
    models::{EntityKind, OperationStatus, OperationType, QueueOperation},
};
use chrono::{Duration, Utc};
use sea_orm::{PaginatorTrait, QueryOrder, Set, prelude::*};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Failed attempts after which an operation becomes terminal
pub const MAX_RETRIES: i32 = 3;

impl TryFrom<sync_operation::Model> for QueueOperation {
    type Error = Error;

    fn try_from(model: sync_operation::Model) -> Result<Self> {
        Ok(Self {
            id: model.id,
            op_type: model.op_type.parse()?,
            entity: model.entity.parse()?,
            local_id: model.local_id,
            data: model.data,
            timestamp: model.timestamp,
            status: model.status.parse()?,
            retries: model.retries,
            last_error: model.last_error,
        })
    }
}

/// Durable operation queue over the `sync_operations` table
#[derive(Debug, Clone)]
pub struct OperationQueue {
    db: DatabaseConnection,
    max_retries: i32,
}

impl OperationQueue {
    /// Queue with the default retry budget
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            max_retries: MAX_RETRIES,
        }
    }

    /// Overrides the retry budget (values below 1 are treated as 1)
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Configured retry budget
    #[must_use]
    pub const fn max_retries(&self) -> i32 {
        self.max_retries
    }

    async fn find_model(&self, id: i64) -> Result<sync_operation::Model> {
        SyncOperation::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(Error::OperationNotFound { id })
    }

    /// Appends a pending operation and returns it.
    #[instrument(skip(self, data))]
    pub async fn enqueue(
        &self,
        op_type: OperationType,
        entity: EntityKind,
        data: serde_json::Value,
        local_id: Option<i64>,
    ) -> Result<QueueOperation> {
        let operation = sync_operation::ActiveModel {
            op_type: Set(op_type.as_str().to_string()),
            entity: Set(entity.as_str().to_string()),
            local_id: Set(local_id),
            data: Set(data),
            timestamp: Set(Utc::now()),
            status: Set(OperationStatus::Pending.as_str().to_string()),
            retries: Set(0),
            last_error: Set(None),
            ..Default::default()
        };

        let inserted = operation.insert(&self.db).await?;
        debug!(id = inserted.id, "Operation queued");
        QueueOperation::try_from(inserted)
    }

    /// Fetches one operation by id.
    pub async fn get(&self, id: i64) -> Result<Option<QueueOperation>> {
        SyncOperation::find_by_id(id)
            .one(&self.db)
            .await?
            .map(QueueOperation::try_from)
            .transpose()
    }

    async fn list_by_status(&self, status: OperationStatus) -> Result<Vec<QueueOperation>> {
        SyncOperation::find()
            .filter(sync_operation::Column::Status.eq(status.as_str()))
            .order_by_asc(sync_operation::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(QueueOperation::try_from)
            .collect()
    }

    /// All pending operations, ascending id.
    pub async fn list_pending(&self) -> Result<Vec<QueueOperation>> {
        self.list_by_status(OperationStatus::Pending).await
    }

    /// All terminal failures, ascending id.
    pub async fn list_failed(&self) -> Result<Vec<QueueOperation>> {
        self.list_by_status(OperationStatus::Failed).await
    }

    async fn count_by_status(&self, status: OperationStatus) -> Result<u64> {
        SyncOperation::find()
            .filter(sync_operation::Column::Status.eq(status.as_str()))
            .count(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Number of operations still waiting to be sent.
    pub async fn pending_count(&self) -> Result<u64> {
        self.count_by_status(OperationStatus::Pending).await
    }

    /// Number of terminal failures.
    pub async fn failed_count(&self) -> Result<u64> {
        self.count_by_status(OperationStatus::Failed).await
    }

    /// Returns operations left in `syncing` by a pass that never finished
    /// (crash, shutdown, local fault) to `pending`. Each counts as one
    /// attempt, so an operation that keeps getting interrupted still ends
    /// up `failed`.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let stranded = self.list_by_status(OperationStatus::Syncing).await?;
        for op in &stranded {
            let stored = self.set_status(op.id, OperationStatus::Pending).await?;
            warn!(id = op.id, status = %stored.status, "Recovered interrupted operation");
        }
        Ok(stranded.len() as u64)
    }

    /// Moves an operation to `status`.
    ///
    /// Retry accounting:
    /// - a transition to `failed` counts one attempt;
    /// - a transition from `syncing` back to `pending` counts one attempt, and
    ///   if that exhausts the budget the operation is stored as `failed`.
    ///
    /// `failed` is terminal: only `failed` is accepted again, and
    /// [`Self::requeue_failed`] is the way back. Once the budget is exhausted
    /// `failed` is likewise the only status accepted.
    #[instrument(skip(self))]
    pub async fn set_status(&self, id: i64, status: OperationStatus) -> Result<QueueOperation> {
        let model = self.find_model(id).await?;
        let current: OperationStatus = model.status.parse()?;

        let leaves_failed = current == OperationStatus::Failed;
        if (leaves_failed || model.retries >= self.max_retries) && status != OperationStatus::Failed {
            return Err(Error::InvalidTransition {
                id,
                from: current.to_string(),
                to: status.to_string(),
            });
        }

        let mut retries = model.retries;
        let mut target = status;
        match (current, status) {
            (OperationStatus::Failed, OperationStatus::Failed) => {}
            (_, OperationStatus::Failed) => retries += 1,
            (OperationStatus::Syncing, OperationStatus::Pending) => {
                retries += 1;
                if retries >= self.max_retries {
                    warn!(id, retries, "Retry budget exhausted, marking operation failed");
                    target = OperationStatus::Failed;
                }
            }
            _ => {}
        }

        let mut active: sync_operation::ActiveModel = model.into();
        active.status = Set(target.as_str().to_string());
        active.retries = Set(retries);
        let updated = active.update(&self.db).await?;
        QueueOperation::try_from(updated)
    }

    /// Stores the message of the most recent failure.
    pub async fn record_error(&self, id: i64, message: &str) -> Result<()> {
        let model = self.find_model(id).await?;
        let mut active: sync_operation::ActiveModel = model.into();
        active.last_error = Set(Some(message.to_string()));
        active.update(&self.db).await?;
        Ok(())
    }

    /// Manual retry of a terminal failure: back to `pending` with a fresh budget.
    #[instrument(skip(self))]
    pub async fn requeue_failed(&self, id: i64) -> Result<QueueOperation> {
        let model = self.find_model(id).await?;
        let current: OperationStatus = model.status.parse()?;
        if current != OperationStatus::Failed {
            return Err(Error::InvalidTransition {
                id,
                from: current.to_string(),
                to: OperationStatus::Pending.to_string(),
            });
        }

        let mut active: sync_operation::ActiveModel = model.into();
        active.status = Set(OperationStatus::Pending.as_str().to_string());
        active.retries = Set(0);
        active.last_error = Set(None);
        let updated = active.update(&self.db).await?;
        info!(id, "Failed operation re-queued");
        QueueOperation::try_from(updated)
    }

    /// Deletes every terminal failure; the explicit user "clear" action.
    pub async fn clear_failed(&self) -> Result<u64> {
        let result = SyncOperation::delete_many()
            .filter(sync_operation::Column::Status.eq(OperationStatus::Failed.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Garbage-collects `completed` operations queued more than `days` ago.
    /// Failed operations are never purged here.
    #[instrument(skip(self))]
    pub async fn purge_completed_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = SyncOperation::delete_many()
            .filter(sync_operation::Column::Status.eq(OperationStatus::Completed.as_str()))
            .filter(sync_operation::Column::Timestamp.lt(cutoff))
            .exec(&self.db)
            .await?;
        debug!(purged = result.rows_affected, "Completed operations purged");
        Ok(result.rows_affected)
    }

    /// Drops not-yet-sent operations staged from one local record, used when the
    /// record is deleted before it ever reached the server.
    pub async fn discard_pending_for(&self, entity: EntityKind, local_id: i64) -> Result<u64> {
        let result = SyncOperation::delete_many()
            .filter(sync_operation::Column::Entity.eq(entity.as_str()))
            .filter(sync_operation::Column::LocalId.eq(local_id))
            .filter(sync_operation::Column::Status.eq(OperationStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Local record ids of `entity` that an operation will still send
    /// (`pending` or `syncing`); reconciliation leaves those to the queue.
    /// Records behind a terminal failure are not included.
    pub async fn unfinished_local_ids(&self, entity: EntityKind) -> Result<HashSet<i64>> {
        let models = SyncOperation::find()
            .filter(sync_operation::Column::Entity.eq(entity.as_str()))
            .filter(sync_operation::Column::Status.is_in([
                OperationStatus::Pending.as_str(),
                OperationStatus::Syncing.as_str(),
            ]))
            .filter(sync_operation::Column::LocalId.is_not_null())
            .all(&self.db)
            .await?;
        Ok(models.into_iter().filter_map(|op| op.local_id).collect())
    }
}
