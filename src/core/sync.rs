//! Sync manager - drains the operation queue against the remote API, then
//! reconciles unsynced local records.
//!
//! One [`SyncManager`] owns the "is a pass running" state. Clones share it,
//! so a pass can be spawned onto the runtime while callers keep a handle.

use crate::{
    config::settings::SyncSettings,
    core::{
        events::{EventBus, SyncEvent},
        queue::OperationQueue,
        remote::{HttpMethod, RemoteApi, RetryClass},
        store::{LocalRecordView, LocalStore, RecordInput, strip_local_fields},
    },
    errors::{Error, Result},
    models::{EntityKind, OperationStatus, OperationType, QueueOperation},
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

/// One queue operation that failed during a pass
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    /// The operation as stored after the failure
    pub operation: QueueOperation,
    /// Display form of the remote or local error
    pub error: String,
}

/// Aggregate result of one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Operations that were pending when the pass started
    pub total: usize,
    /// Operations acknowledged by the server
    pub succeeded: usize,
    /// Operations that failed this pass (re-queued or terminal)
    pub failed: usize,
    /// Per-operation failures
    pub errors: Vec<OperationFailure>,
    /// Unsynced local records pushed during reconciliation
    pub reconciled: usize,
    /// Unsynced local records whose push failed; retried on the next pass
    pub reconcile_failed: usize,
}

/// What a call to [`SyncManager::sync`] amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Not started: connectivity is down
    Offline,
    /// Skipped: another pass is running
    AlreadySyncing,
    /// Completed, but some operations failed
    PartialFailure(SyncReport),
    /// Completed with zero operation failures
    Success(SyncReport),
}

impl SyncOutcome {
    /// Report of a completed pass
    #[must_use]
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::PartialFailure(report) | Self::Success(report) => Some(report),
            Self::Offline | Self::AlreadySyncing => None,
        }
    }
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Current connectivity
    pub online: bool,
    /// Whether a pass is running right now
    pub in_progress: bool,
    /// Operations waiting to be sent
    pub pending: u64,
    /// Terminal failures awaiting user action
    pub failed: u64,
    /// End of the last completed pass
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Failures of the last completed pass
    pub errors: Vec<OperationFailure>,
}

#[derive(Debug, Default)]
struct SyncSession {
    last_sync_time: Option<DateTime<Utc>>,
    errors: Vec<OperationFailure>,
}

/// Holds the in-progress flag for the lifetime of a pass
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    store: LocalStore,
    queue: OperationQueue,
    api: Arc<dyn RemoteApi>,
    events: EventBus,
    online: watch::Receiver<bool>,
    settings: SyncSettings,
    in_progress: AtomicBool,
    session: Mutex<SyncSession>,
}

/// Handle to the sync engine; cheap to clone
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("online", &*self.inner.online.borrow())
            .field("in_progress", &self.inner.in_progress.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

fn response_id(response: &Value) -> Option<i64> {
    response.get("id").and_then(Value::as_i64)
}

impl SyncManager {
    /// Builds the engine over an initialized database.
    ///
    /// `online` is the receiving side of the platform connectivity signal.
    pub fn new(
        db: DatabaseConnection,
        api: Arc<dyn RemoteApi>,
        online: watch::Receiver<bool>,
        settings: SyncSettings,
    ) -> Self {
        let queue = OperationQueue::new(db.clone()).with_max_retries(settings.max_retries);
        Self {
            inner: Arc::new(Inner {
                store: LocalStore::new(db),
                queue,
                api,
                events: EventBus::new(settings.event_buffer),
                online,
                settings,
                in_progress: AtomicBool::new(false),
                session: Mutex::new(SyncSession::default()),
            }),
        }
    }

    /// Local record storage
    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    /// Durable operation queue
    #[must_use]
    pub fn queue(&self) -> &OperationQueue {
        &self.inner.queue
    }

    /// Event publisher shared with the connectivity monitor
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Receiver for lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Current connectivity as last reported by the platform
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Whether a pass is running
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    /// Number of operations waiting to be sent
    pub async fn pending_count(&self) -> Result<u64> {
        self.inner.queue.pending_count().await
    }

    /// Runs one sync pass.
    ///
    /// Returns `Offline` or `AlreadySyncing` without touching any state when
    /// the pass cannot start. A storage fault outside a single operation
    /// (listing the queue, scanning for reconciliation, purging) emits
    /// `SyncError` and is returned as `Err`; remote failures never are.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<SyncOutcome> {
        if !self.is_online() {
            debug!("Sync requested while offline");
            return Ok(SyncOutcome::Offline);
        }
        let Some(_guard) = PassGuard::acquire(&self.inner.in_progress) else {
            debug!("Sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadySyncing);
        };

        match self.run_pass().await {
            Ok(report) => {
                info!(
                    total = report.total,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    reconciled = report.reconciled,
                    "Sync pass complete"
                );
                if report.errors.is_empty() {
                    Ok(SyncOutcome::Success(report))
                } else {
                    Ok(SyncOutcome::PartialFailure(report))
                }
            }
            Err(e) => {
                error!("Sync pass aborted: {e}");
                self.inner.events.publish(SyncEvent::SyncError {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Starts a pass in the background if online. Errors surface through
    /// the event bus only.
    pub fn trigger(&self) {
        if !self.is_online() {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.sync().await {
                debug!("Background sync failed: {e}");
            }
        });
    }

    async fn run_pass(&self) -> Result<SyncReport> {
        self.inner.session.lock().await.errors.clear();
        self.inner.events.publish(SyncEvent::SyncStart);

        // nothing can be mid-flight while this pass holds the flag
        let recovered = self.inner.queue.recover_interrupted().await?;
        if recovered > 0 {
            info!(recovered, "Re-queued operations from an interrupted pass");
        }

        let pending = self.inner.queue.list_pending().await?;
        let mut report = SyncReport {
            total: pending.len(),
            ..SyncReport::default()
        };

        for op in pending {
            if let Err(e) = self.process_operation(&op, &mut report).await {
                error!(id = op.id, "Local storage failed while syncing operation: {e}");
                let operation = self.release_operation(op).await;
                report.failed += 1;
                report.errors.push(OperationFailure {
                    operation,
                    error: e.to_string(),
                });
            }
        }

        self.reconcile(&mut report).await?;

        let purged = self
            .inner
            .queue
            .purge_completed_older_than(self.inner.settings.purge_completed_after_days)
            .await?;
        if purged > 0 {
            debug!(purged, "Purged completed operations");
        }

        {
            let mut session = self.inner.session.lock().await;
            session.last_sync_time = Some(Utc::now());
            session.errors.clone_from(&report.errors);
        }
        self.inner
            .events
            .publish(SyncEvent::SyncComplete(report.clone()));
        Ok(report)
    }

    /// Sends one operation and records its outcome. Only local storage
    /// faults are returned; remote failures land in `report`.
    async fn process_operation(&self, op: &QueueOperation, report: &mut SyncReport) -> Result<()> {
        let queue = &self.inner.queue;
        let op = queue.set_status(op.id, OperationStatus::Syncing).await?;

        match self.dispatch(&op).await {
            Ok(response) => {
                let done = queue.set_status(op.id, OperationStatus::Completed).await?;
                if let Err(e) = self.acknowledge_local(&done, &response).await {
                    warn!(id = op.id, "Could not update local record after sync: {e}");
                }
                report.succeeded += 1;
                self.inner.events.publish(SyncEvent::OperationSynced(done));
            }
            Err(e) => {
                let message = e.to_string();
                let next = self.status_after_failure(&op, &e);
                warn!(
                    id = op.id,
                    op_type = %op.op_type,
                    entity = %op.entity,
                    retries = op.retries,
                    "Operation failed: {message}"
                );
                queue.record_error(op.id, &message).await?;
                let stored = queue.set_status(op.id, next).await?;
                report.failed += 1;
                report.errors.push(OperationFailure {
                    operation: stored,
                    error: message,
                });
            }
        }
        Ok(())
    }

    /// Puts an operation left in `syncing` by a local fault back to
    /// `pending` and returns its stored state. Falls back to `op` when the
    /// store cannot be read; the next pass recovers it then.
    async fn release_operation(&self, op: QueueOperation) -> QueueOperation {
        let queue = &self.inner.queue;
        match queue.get(op.id).await {
            Ok(Some(stored)) if stored.status == OperationStatus::Syncing => {
                match queue.set_status(op.id, OperationStatus::Pending).await {
                    Ok(released) => released,
                    Err(e) => {
                        warn!(id = op.id, "Could not release operation: {e}");
                        stored
                    }
                }
            }
            Ok(Some(stored)) => stored,
            Ok(None) => op,
            Err(e) => {
                warn!(id = op.id, "Could not re-read operation: {e}");
                op
            }
        }
    }

    fn status_after_failure(&self, op: &QueueOperation, error: &Error) -> OperationStatus {
        let class = match error {
            Error::Api(api) => api.retry_class(),
            _ => RetryClass::Permanent,
        };
        if class == RetryClass::Permanent && self.inner.settings.permanent_client_errors {
            return OperationStatus::Failed;
        }
        if op.retries + 1 < self.inner.queue.max_retries() {
            OperationStatus::Pending
        } else {
            OperationStatus::Failed
        }
    }

    async fn dispatch(&self, op: &QueueOperation) -> Result<Value> {
        let collection = op.entity.collection();
        let (method, path, body) = match op.op_type {
            OperationType::Create => (HttpMethod::Post, format!("{collection}/"), Some(op.data.clone())),
            OperationType::Update | OperationType::Delete => {
                let id = op.remote_id().ok_or_else(|| {
                    Error::corrupt(format!("{} operation {} carries no remote id", op.op_type, op.id))
                })?;
                if op.op_type == OperationType::Update {
                    (HttpMethod::Put, format!("{collection}/{id}"), Some(op.data.clone()))
                } else {
                    (HttpMethod::Delete, format!("{collection}/{id}"), None)
                }
            }
        };
        Ok(self.inner.api.request(method, &path, body).await?)
    }

    /// Reflects a completed operation onto the local record it was staged from.
    /// A record edited after the operation was queued stays unsynced so
    /// reconciliation sends the newer state.
    async fn acknowledge_local(&self, op: &QueueOperation, response: &Value) -> Result<()> {
        let Some(local_id) = op.local_id else {
            return Ok(());
        };
        let store = &self.inner.store;
        let Some(record) = store.get(op.entity, local_id).await? else {
            return Ok(());
        };

        if op.op_type == OperationType::Create {
            if let Some(remote_id) = response_id(response) {
                store.set_remote_id(op.entity, local_id, remote_id).await?;
            }
        }
        if record.updated_at <= op.timestamp {
            store.mark_synced(op.entity, local_id).await?;
        }
        Ok(())
    }

    async fn reconcile(&self, report: &mut SyncReport) -> Result<()> {
        for kind in EntityKind::RECONCILED {
            let owned_by_queue = self.inner.queue.unfinished_local_ids(kind).await?;
            for record in self.inner.store.list_unsynced(kind).await? {
                if owned_by_queue.contains(&record.id) {
                    continue;
                }
                match self.push_record(&record).await {
                    Ok(()) => report.reconciled += 1,
                    Err(e) => {
                        warn!(collection = kind.collection(), id = record.id, "Reconciliation failed: {e}");
                        report.reconcile_failed += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn push_record(&self, record: &LocalRecordView) -> Result<()> {
        let collection = record.kind.collection();
        let body = strip_local_fields(record.to_json());
        match (record.remote_id, record.offline_created) {
            (Some(remote_id), _) => {
                self.inner
                    .api
                    .request(HttpMethod::Put, &format!("{collection}/{remote_id}"), Some(body))
                    .await?;
            }
            (None, true) => {
                let response = self
                    .inner
                    .api
                    .request(HttpMethod::Post, &format!("{collection}/"), Some(body))
                    .await?;
                if let Some(remote_id) = response_id(&response) {
                    self.inner
                        .store
                        .set_remote_id(record.kind, record.id, remote_id)
                        .await?;
                }
            }
            (None, false) => {
                return Err(Error::corrupt(format!(
                    "{collection} record {} has no remote id to update",
                    record.id
                )));
            }
        }
        self.inner.store.mark_synced(record.kind, record.id).await
    }

    /// Appends an operation, announces it, and kicks off a pass if online.
    #[instrument(skip(self, data))]
    pub async fn queue_operation(
        &self,
        op_type: OperationType,
        entity: EntityKind,
        data: Value,
        local_id: Option<i64>,
    ) -> Result<QueueOperation> {
        let op = self.inner.queue.enqueue(op_type, entity, data, local_id).await?;
        self.inner
            .events
            .publish(SyncEvent::OperationQueued(op.clone()));
        self.trigger();
        Ok(op)
    }

    /// Stores a new record locally and queues its create.
    pub async fn stage_create(
        &self,
        kind: EntityKind,
        user_id: Option<i64>,
        payload: Value,
    ) -> Result<(i64, QueueOperation)> {
        let local_id = self
            .inner
            .store
            .put(kind, RecordInput::offline(user_id, payload.clone()))
            .await?;
        let op = self
            .queue_operation(OperationType::Create, kind, strip_local_fields(payload), Some(local_id))
            .await?;
        Ok((local_id, op))
    }

    /// Overwrites a local record and queues its update.
    ///
    /// Records the server has not assigned an id to yet queue nothing: their
    /// create is still in flight, and the newer state goes out through
    /// reconciliation once it lands.
    pub async fn stage_update(
        &self,
        kind: EntityKind,
        local_id: i64,
        payload: Value,
    ) -> Result<Option<QueueOperation>> {
        let record = self
            .inner
            .store
            .get(kind, local_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound {
                collection: kind.collection().to_string(),
                id: local_id,
            })?;

        let input = RecordInput {
            id: Some(local_id),
            user_id: record.user_id,
            remote_id: record.remote_id,
            offline_created: false,
            payload: payload.clone(),
        };
        self.inner.store.put(kind, input).await?;

        let Some(remote_id) = record.remote_id else {
            return Ok(None);
        };
        let mut data = strip_local_fields(payload);
        if let Value::Object(map) = &mut data {
            map.insert("id".to_string(), Value::from(remote_id));
        }
        self.queue_operation(OperationType::Update, kind, data, Some(local_id))
            .await
            .map(Some)
    }

    /// Removes a local record and queues its remote delete.
    ///
    /// A record that never reached the server just loses its pending create.
    pub async fn stage_delete(&self, kind: EntityKind, local_id: i64) -> Result<Option<QueueOperation>> {
        let record = self
            .inner
            .store
            .get(kind, local_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound {
                collection: kind.collection().to_string(),
                id: local_id,
            })?;
        self.inner.store.remove(kind, local_id).await?;

        let Some(remote_id) = record.remote_id else {
            let dropped = self.inner.queue.discard_pending_for(kind, local_id).await?;
            debug!(local_id, dropped, "Deleted record that was never synced");
            return Ok(None);
        };
        self.queue_operation(
            OperationType::Delete,
            kind,
            serde_json::json!({ "id": remote_id }),
            None,
        )
        .await
        .map(Some)
    }

    /// Manual retry of a terminal failure.
    pub async fn retry_failed(&self, id: i64) -> Result<QueueOperation> {
        let op = self.inner.queue.requeue_failed(id).await?;
        self.trigger();
        Ok(op)
    }

    /// Drops every terminal failure from the queue.
    pub async fn clear_failed(&self) -> Result<u64> {
        self.inner.queue.clear_failed().await
    }

    /// Empties the session error list.
    pub async fn clear_errors(&self) {
        self.inner.session.lock().await.errors.clear();
        self.inner.events.publish(SyncEvent::ErrorsCleared);
    }

    /// Errors recorded by the last completed pass
    pub async fn errors(&self) -> Vec<OperationFailure> {
        self.inner.session.lock().await.errors.clone()
    }

    /// Snapshot of the engine for status displays.
    pub async fn status(&self) -> Result<SyncStatus> {
        let pending = self.inner.queue.pending_count().await?;
        let failed = self.inner.queue.failed_count().await?;
        let session = self.inner.session.lock().await;
        Ok(SyncStatus {
            online: self.is_online(),
            in_progress: self.is_syncing(),
            pending,
            failed,
            last_sync_time: session.last_sync_time,
            errors: session.errors.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::{MockApi, backdate_operation, drain_events, test_manager};
    use serde_json::json;
    use tokio::sync::Notify;

    async fn offline_record(manager: &SyncManager, kind: EntityKind, payload: Value) -> Result<i64> {
        manager
            .store()
            .put(kind, RecordInput::offline(Some(1), payload))
            .await
    }

    #[tokio::test]
    async fn test_empty_pass_is_noop_with_events() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, _signal) = test_manager(Arc::clone(&api), true).await?;
        let mut rx = manager.subscribe();

        let outcome = manager.sync().await?;
        let report = outcome.report().unwrap();
        assert_eq!((report.total, report.succeeded, report.failed), (0, 0, 0));
        assert!(matches!(outcome, SyncOutcome::Success(_)));
        assert!(api.calls().is_empty());

        let events = drain_events(&mut rx);
        assert_eq!(events.first(), Some(&SyncEvent::SyncStart));
        assert!(matches!(events.last(), Some(SyncEvent::SyncComplete(r)) if r.total == 0));
        assert!(manager.status().await?.last_sync_time.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_offline_fails_fast_without_side_effects() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, _signal) = test_manager(Arc::clone(&api), false).await?;
        manager
            .queue_operation(OperationType::Create, EntityKind::Budget, json!({ "amount": 1 }), None)
            .await?;
        let mut rx = manager.subscribe();

        assert_eq!(manager.sync().await?, SyncOutcome::Offline);
        assert!(drain_events(&mut rx).is_empty());
        assert!(api.calls().is_empty());
        let pending = manager.queue().list_pending().await?;
        assert_eq!(pending[0].status, OperationStatus::Pending);
        assert!(manager.status().await?.last_sync_time.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_operations_dispatch_in_id_order() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        manager
            .queue_operation(OperationType::Create, EntityKind::Category, json!({ "name": "Food" }), None)
            .await?;
        manager
            .queue_operation(OperationType::Update, EntityKind::Category, json!({ "id": 5, "name": "Groceries" }), None)
            .await?;
        manager
            .queue_operation(OperationType::Delete, EntityKind::Budget, json!({ "id": 8 }), None)
            .await?;
        signal.set_online(true);

        let outcome = manager.sync().await?;
        assert!(matches!(outcome, SyncOutcome::Success(ref r) if r.succeeded == 3));
        assert_eq!(
            api.paths(),
            vec![
                (HttpMethod::Post, "categories/".to_string()),
                (HttpMethod::Put, "categories/5".to_string()),
                (HttpMethod::Delete, "budgets/8".to_string()),
            ]
        );
        assert_eq!(api.calls()[2].body, None);
        assert_eq!(manager.pending_count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_after_three_passes() -> Result<()> {
        let api = Arc::new(MockApi::failing(503));
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let op = manager
            .queue_operation(OperationType::Create, EntityKind::Transaction, json!({ "amount": 10 }), None)
            .await?;
        signal.set_online(true);

        for expected in 1..=2 {
            let outcome = manager.sync().await?;
            assert!(matches!(outcome, SyncOutcome::PartialFailure(ref r) if r.failed == 1));
            let stored = manager.queue().get(op.id).await?.unwrap();
            assert_eq!(stored.status, OperationStatus::Pending);
            assert_eq!(stored.retries, expected);
        }

        let outcome = manager.sync().await?;
        let report = outcome.report().unwrap();
        assert_eq!(report.errors[0].operation.status, OperationStatus::Failed);
        assert_eq!(report.errors[0].operation.retries, 3);
        assert!(report.errors[0].error.contains("503"));

        // terminal: later passes never pick it up
        let outcome = manager.sync().await?;
        assert_eq!(outcome.report().unwrap().total, 0);
        assert_eq!(api.calls().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() -> Result<()> {
        let api = Arc::new(MockApi::new());
        api.fail_path("budgets/");
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        manager
            .queue_operation(OperationType::Create, EntityKind::Budget, json!({}), None)
            .await?;
        manager
            .queue_operation(OperationType::Create, EntityKind::Category, json!({}), None)
            .await?;
        signal.set_online(true);

        let outcome = manager.sync().await?;
        let report = outcome.report().unwrap();
        assert_eq!((report.total, report.succeeded, report.failed), (2, 1, 1));
        assert_eq!(report.errors[0].operation.entity, EntityKind::Budget);
        assert_eq!(manager.errors().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_terminal_immediately() -> Result<()> {
        let api = Arc::new(MockApi::failing(422));
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let op = manager
            .queue_operation(OperationType::Create, EntityKind::Budget, json!({}), None)
            .await?;
        signal.set_online(true);

        manager.sync().await?;
        let stored = manager.queue().get(op.id).await?.unwrap();
        assert_eq!(stored.status, OperationStatus::Failed);
        assert_eq!(stored.retries, 1);
        assert_eq!(stored.last_error.as_deref(), Some("Remote API error: HTTP 422: mock failure"));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_without_remote_id_fails_permanently() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let op = manager
            .queue_operation(OperationType::Update, EntityKind::Budget, json!({ "amount": 3 }), None)
            .await?;
        signal.set_online(true);

        manager.sync().await?;
        assert!(api.calls().is_empty());
        let stored = manager.queue().get(op.id).await?.unwrap();
        assert_eq!(stored.status, OperationStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_sync_runs_one_pass() -> Result<()> {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let api = Arc::new(MockApi::new().with_gate(Arc::clone(&gate), Arc::clone(&entered)));
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let op = manager
            .queue_operation(OperationType::Create, EntityKind::Budget, json!({}), None)
            .await?;
        signal.set_online(true);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.sync().await }
        });
        entered.notified().await;
        assert!(manager.is_syncing());

        assert_eq!(manager.sync().await?, SyncOutcome::AlreadySyncing);
        let stored = manager.queue().get(op.id).await?.unwrap();
        assert_eq!(stored.status, OperationStatus::Syncing);
        assert_eq!(stored.retries, 0);

        gate.notify_one();
        let outcome = first.await.unwrap()?;
        assert!(matches!(outcome, SyncOutcome::Success(ref r) if r.total == 1));
        assert_eq!(api.calls().len(), 1);
        assert!(!manager.is_syncing());
        Ok(())
    }

    #[tokio::test]
    async fn test_interrupted_operation_is_sent_next_pass() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let (local_id, op) = manager
            .stage_create(EntityKind::Budget, Some(1), json!({ "amount": "7" }))
            .await?;
        // left behind by a pass that never finished
        manager.queue().set_status(op.id, OperationStatus::Syncing).await?;
        assert_eq!(manager.pending_count().await?, 0);
        signal.set_online(true);

        let outcome = manager.sync().await?;
        assert!(matches!(outcome, SyncOutcome::Success(ref r) if r.succeeded == 1));
        assert_eq!(api.paths(), vec![(HttpMethod::Post, "budgets/".to_string())]);

        let stored = manager.queue().get(op.id).await?.unwrap();
        assert_eq!((stored.status, stored.retries), (OperationStatus::Completed, 1));
        let record = manager.store().get(EntityKind::Budget, local_id).await?.unwrap();
        assert!(record.synced);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_fault_reports_stored_operation() -> Result<()> {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let api = Arc::new(MockApi::new().with_gate(Arc::clone(&gate), Arc::clone(&entered)));
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let op = manager
            .queue_operation(OperationType::Create, EntityKind::Budget, json!({}), None)
            .await?;
        signal.set_online(true);

        let pass = tokio::spawn({
            let manager = manager.clone();
            async move { manager.sync().await }
        });
        entered.notified().await;
        // the row changes underneath the in-flight request
        manager.queue().set_status(op.id, OperationStatus::Failed).await?;
        gate.notify_one();

        let outcome = pass.await.unwrap()?;
        let report = outcome.report().unwrap();
        assert_eq!((report.succeeded, report.failed), (0, 1));
        let reported = &report.errors[0].operation;
        assert_eq!(Some(reported.clone()), manager.queue().get(op.id).await?);
        assert_eq!(reported.status, OperationStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconciliation_recovers_record_behind_failed_create() -> Result<()> {
        let api = Arc::new(MockApi::failing(503));
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let (local_id, op) = manager
            .stage_create(EntityKind::Category, Some(1), json!({ "name": "Rent", "type": "expense" }))
            .await?;
        signal.set_online(true);

        for _ in 0..3 {
            manager.sync().await?;
        }
        let stored = manager.queue().get(op.id).await?.unwrap();
        assert_eq!(stored.status, OperationStatus::Failed);

        api.set_failure(None);
        let before = api.calls().len();
        let outcome = manager.sync().await?;
        assert_eq!(outcome.report().unwrap().reconciled, 1);
        assert_eq!(api.calls().len(), before + 1);
        assert_eq!(
            api.paths().last(),
            Some(&(HttpMethod::Post, "categories/".to_string()))
        );

        let record = manager.store().get(EntityKind::Category, local_id).await?.unwrap();
        assert!(record.synced);
        assert!(record.remote_id.is_some());

        // nothing left to send
        let outcome = manager.sync().await?;
        assert_eq!(outcome.report().unwrap().reconciled, 0);
        assert_eq!(api.calls().len(), before + 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconciliation_creates_offline_records() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, _signal) = test_manager(Arc::clone(&api), true).await?;
        let id = offline_record(&manager, EntityKind::Budget, json!({ "amount": "5000" })).await?;

        let outcome = manager.sync().await?;
        let report = outcome.report().unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.reconciled, 1);

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, HttpMethod::Post);
        assert_eq!(calls[0].path, "budgets/");
        let body = calls[0].body.clone().unwrap();
        assert_eq!(body, json!({ "amount": "5000" }));

        let record = manager.store().get(EntityKind::Budget, id).await?.unwrap();
        assert!(record.synced);
        assert!(record.remote_id.is_some());

        // second pass has nothing left to do
        manager.sync().await?;
        assert_eq!(api.calls().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconciliation_updates_known_records_and_skips_notifications() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, _signal) = test_manager(Arc::clone(&api), true).await?;
        manager
            .store()
            .put(EntityKind::Category, RecordInput::known_remote(Some(1), 31, json!({ "name": "Rent" })))
            .await?;
        offline_record(&manager, EntityKind::Notification, json!({ "title": "hi" })).await?;

        let outcome = manager.sync().await?;
        assert_eq!(outcome.report().unwrap().reconciled, 1);
        assert_eq!(api.paths(), vec![(HttpMethod::Put, "categories/31".to_string())]);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconciliation_failure_is_counted_not_fatal() -> Result<()> {
        let api = Arc::new(MockApi::new());
        api.fail_path("budgets/");
        let (manager, _signal) = test_manager(Arc::clone(&api), true).await?;
        let failing = offline_record(&manager, EntityKind::Budget, json!({})).await?;
        let ok = offline_record(&manager, EntityKind::Transaction, json!({})).await?;

        let outcome = manager.sync().await?;
        let report = outcome.report().unwrap();
        assert!(matches!(outcome, SyncOutcome::Success(_)));
        assert_eq!((report.reconciled, report.reconcile_failed), (1, 1));
        assert!(!manager.store().get(EntityKind::Budget, failing).await?.unwrap().synced);
        assert!(manager.store().get(EntityKind::Transaction, ok).await?.unwrap().synced);
        Ok(())
    }

    #[tokio::test]
    async fn test_staged_create_is_sent_once() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let (local_id, op) = manager
            .stage_create(EntityKind::Transaction, Some(1), json!({ "amount": "-20.00" }))
            .await?;
        assert_eq!(op.local_id, Some(local_id));
        signal.set_online(true);

        let outcome = manager.sync().await?;
        let report = outcome.report().unwrap();
        assert_eq!((report.succeeded, report.reconciled), (1, 0));
        assert_eq!(api.calls().len(), 1);

        let record = manager.store().get(EntityKind::Transaction, local_id).await?.unwrap();
        assert!(record.synced);
        assert_eq!(record.remote_id, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_queue_owns_its_record() -> Result<()> {
        let api = Arc::new(MockApi::failing(500));
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        manager
            .stage_create(EntityKind::Budget, Some(1), json!({ "amount": "1" }))
            .await?;
        signal.set_online(true);

        let outcome = manager.sync().await?;
        let report = outcome.report().unwrap();
        // the re-queued create keeps reconciliation away from the same record
        assert_eq!((report.failed, report.reconciled, report.reconcile_failed), (1, 0, 0));
        assert_eq!(api.calls().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_update_and_delete() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let local_id = manager
            .store()
            .put(EntityKind::Budget, RecordInput::known_remote(Some(1), 12, json!({ "amount": "1" })))
            .await?;

        let update = manager
            .stage_update(EntityKind::Budget, local_id, json!({ "amount": "2" }))
            .await?
            .unwrap();
        assert_eq!(update.remote_id(), Some(12));
        let delete = manager.stage_delete(EntityKind::Budget, local_id).await?.unwrap();
        assert_eq!(delete.data, json!({ "id": 12 }));
        assert!(manager.store().get(EntityKind::Budget, local_id).await?.is_none());

        signal.set_online(true);
        manager.sync().await?;
        assert_eq!(
            api.paths(),
            vec![
                (HttpMethod::Put, "budgets/12".to_string()),
                (HttpMethod::Delete, "budgets/12".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_unsent_record_drops_its_create() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let (local_id, _) = manager
            .stage_create(EntityKind::Category, Some(1), json!({ "name": "Tmp" }))
            .await?;

        assert!(manager.stage_delete(EntityKind::Category, local_id).await?.is_none());
        assert_eq!(manager.pending_count().await?, 0);

        signal.set_online(true);
        manager.sync().await?;
        assert!(api.calls().is_empty());

        let missing = manager.stage_delete(EntityKind::Category, local_id).await;
        assert!(matches!(missing, Err(Error::RecordNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_completed_operations_are_garbage_collected() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, _signal) = test_manager(Arc::clone(&api), true).await?;
        let queue = manager.queue();
        let old = queue
            .enqueue(OperationType::Create, EntityKind::Budget, json!({}), None)
            .await?;
        let recent = queue
            .enqueue(OperationType::Create, EntityKind::Budget, json!({}), None)
            .await?;
        for op in [&old, &recent] {
            queue.set_status(op.id, OperationStatus::Completed).await?;
        }
        let db = manager.store().connection();
        backdate_operation(db, old.id, 10).await?;
        backdate_operation(db, recent.id, 2).await?;

        manager.sync().await?;
        assert!(queue.get(old.id).await?.is_none());
        assert!(queue.get(recent.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_failed_and_clear_errors() -> Result<()> {
        let api = Arc::new(MockApi::failing(400));
        let (manager, signal) = test_manager(Arc::clone(&api), false).await?;
        let op = manager
            .queue_operation(OperationType::Create, EntityKind::Budget, json!({}), None)
            .await?;
        signal.set_online(true);
        manager.sync().await?;
        assert_eq!(manager.status().await?.failed, 1);
        assert_eq!(manager.errors().await.len(), 1);

        let mut rx = manager.subscribe();
        manager.clear_errors().await;
        assert!(manager.errors().await.is_empty());
        assert_eq!(drain_events(&mut rx), vec![SyncEvent::ErrorsCleared]);

        api.set_failure(None);
        signal.set_online(false);
        let requeued = manager.retry_failed(op.id).await?;
        assert_eq!(requeued.retries, 0);
        signal.set_online(true);

        let outcome = manager.sync().await?;
        assert!(matches!(outcome, SyncOutcome::Success(ref r) if r.succeeded == 1));
        assert_eq!(manager.status().await?.failed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_operation_announces_and_triggers() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, _signal) = test_manager(Arc::clone(&api), true).await?;
        let mut rx = manager.subscribe();

        let op = manager
            .queue_operation(OperationType::Create, EntityKind::Notification, json!({ "title": "t" }), None)
            .await?;
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::OperationQueued(op.clone()));

        // the spawned pass delivers it without an explicit sync call
        loop {
            if let SyncEvent::SyncComplete(report) = rx.recv().await.unwrap() {
                assert_eq!(report.succeeded, 1);
                break;
            }
        }
        assert_eq!(api.paths(), vec![(HttpMethod::Post, "notifications/".to_string())]);
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_fault_emits_sync_error() -> Result<()> {
        let api = Arc::new(MockApi::new());
        let (manager, _signal) = test_manager(api, true).await?;
        manager.store().connection().clone().close().await?;
        let mut rx = manager.subscribe();

        assert!(manager.sync().await.is_err());
        let events = drain_events(&mut rx);
        assert!(matches!(events.last(), Some(SyncEvent::SyncError { .. })));
        assert!(!manager.is_syncing());
        Ok(())
    }
}
