//! Shared test utilities.
//!
//! In-memory databases, a recording fake of the remote API, and a fully
//! wired [`SyncManager`] for tests that exercise whole passes.
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use crate::{
    config::settings::SyncSettings,
    core::{
        connectivity::ConnectivitySignal,
        events::SyncEvent,
        remote::{ApiError, HttpMethod, RemoteApi},
        sync::SyncManager,
    },
    entities::{SyncOperation, sync_operation},
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{DatabaseConnection, Set, prelude::*};
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI64, Ordering},
};
use tokio::sync::{Notify, broadcast};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all database tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Moves a queue operation's timestamp `days` into the past.
pub async fn backdate_operation(db: &DatabaseConnection, id: i64, days: i64) -> Result<()> {
    let model = SyncOperation::find_by_id(id)
        .one(db)
        .await?
        .ok_or(Error::OperationNotFound { id })?;
    let mut active: sync_operation::ActiveModel = model.into();
    active.timestamp = Set(Utc::now() - Duration::days(days));
    active.update(db).await?;
    Ok(())
}

/// Everything currently buffered on an event receiver, without waiting.
pub fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A sync manager over a fresh in-memory database, plus the signal that
/// drives its connectivity.
pub async fn test_manager(
    api: Arc<MockApi>,
    online: bool,
) -> Result<(SyncManager, ConnectivitySignal)> {
    let db = setup_test_db().await?;
    let signal = ConnectivitySignal::new(online);
    let manager = SyncManager::new(db, api, signal.subscribe(), SyncSettings::default());
    Ok((manager, signal))
}

/// One request seen by [`MockApi`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Verb
    pub method: HttpMethod,
    /// Path relative to the API base
    pub path: String,
    /// JSON body, if any
    pub body: Option<Value>,
}

/// Recording [`RemoteApi`] fake.
///
/// Succeeds by default: POST answers `{"id": n}` with increasing `n`, PUT
/// echoes the body, DELETE answers nothing.
#[derive(Debug, Default)]
pub struct MockApi {
    calls: Mutex<Vec<RecordedCall>>,
    failure: Mutex<Option<u16>>,
    failing_paths: Mutex<Vec<String>>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    next_id: AtomicI64,
}

impl MockApi {
    /// Always-succeeding fake
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake that answers every request with `status`
    pub fn failing(status: u16) -> Self {
        let api = Self::new();
        api.set_failure(Some(status));
        api
    }

    /// Changes the blanket failure status; `None` restores success.
    pub fn set_failure(&self, status: Option<u16>) {
        *self.failure.lock().unwrap() = status;
    }

    /// Makes requests to exactly `path` fail with 500.
    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().unwrap().push(path.to_string());
    }

    /// The first request signals `entered`, then waits for `release`.
    #[must_use]
    pub fn with_gate(self, release: Arc<Notify>, entered: Arc<Notify>) -> Self {
        *self.gate.lock().unwrap() = Some((release, entered));
        self
    }

    /// Requests seen so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(method, path)` of every request, in order
    pub fn paths(&self) -> Vec<(HttpMethod, String)> {
        self.calls()
            .into_iter()
            .map(|call| (call.method, call.path))
            .collect()
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> std::result::Result<Value, ApiError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.clone(),
        });

        let gate = self.gate.lock().unwrap().take();
        if let Some((release, entered)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        if let Some(status) = *self.failure.lock().unwrap() {
            return Err(ApiError::status(status, "mock failure"));
        }
        if self.failing_paths.lock().unwrap().iter().any(|p| p == path) {
            return Err(ApiError::status(500, "mock failure"));
        }

        Ok(match method {
            HttpMethod::Post => json!({ "id": self.next_id.fetch_add(1, Ordering::SeqCst) + 1 }),
            HttpMethod::Put => body.unwrap_or(Value::Null),
            HttpMethod::Delete => Value::Null,
        })
    }
}
