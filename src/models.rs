//! Domain vocabulary shared by the store, the queue and the sync manager.
//!
//! Entity payloads are stored opaquely as JSON; the structs at the bottom of
//! this module are the typed shapes callers usually serialize into them.

use crate::errors::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of syncable domain records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Spending limit over a date range
    Budget,
    /// Income/expense grouping
    Category,
    /// Single income or expense entry
    Transaction,
    /// User-facing alert
    Notification,
}

impl EntityKind {
    /// Every entity kind, in a stable order
    pub const ALL: [Self; 4] = [
        Self::Budget,
        Self::Category,
        Self::Transaction,
        Self::Notification,
    ];

    /// Kinds that take part in post-queue reconciliation.
    /// Notifications are server-generated and only ever flow through the queue.
    pub const RECONCILED: [Self; 3] = [Self::Budget, Self::Category, Self::Transaction];

    /// Singular name used in the queue's `entity` column
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Category => "category",
            Self::Transaction => "transaction",
            Self::Notification => "notification",
        }
    }

    /// Plural collection name, used both as the local collection key and the REST path segment
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Budget => "budgets",
            Self::Category => "categories",
            Self::Transaction => "transactions",
            Self::Notification => "notifications",
        }
    }

    /// Maps a collection name back to its kind
    #[must_use]
    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == collection)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::corrupt(format!("unknown entity kind '{s}'")))
    }
}

/// The mutation a queue operation carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// `POST /{collection}/`
    Create,
    /// `PUT /{collection}/{id}`
    Update,
    /// `DELETE /{collection}/{id}`
    Delete,
}

impl OperationType {
    /// Stored representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::corrupt(format!("unknown operation type '{other}'"))),
        }
    }
}

/// Lifecycle state of a queue operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for the next sync pass
    Pending,
    /// Currently being sent
    Syncing,
    /// Acknowledged by the remote; kept for a bounded history window
    Completed,
    /// Retry budget exhausted or permanently rejected; terminal until the user acts
    Failed,
}

impl OperationStatus {
    /// Stored representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::corrupt(format!("unknown operation status '{other}'"))),
        }
    }
}

/// A durable instruction to create/update/delete one entity remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOperation {
    /// Queue id; processing order within a pass
    pub id: i64,
    /// Mutation type
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Target entity kind
    pub entity: EntityKind,
    /// Local record this operation was staged from, if any
    pub local_id: Option<i64>,
    /// Payload; carries the remote `id` for update/delete
    pub data: serde_json::Value,
    /// When the operation was queued
    pub timestamp: DateTime<Utc>,
    /// Lifecycle state
    pub status: OperationStatus,
    /// Failed attempts so far
    pub retries: i32,
    /// Last error message recorded against this operation
    pub last_error: Option<String>,
}

impl QueueOperation {
    /// Remote id carried in `data.id`, as used by update/delete paths
    #[must_use]
    pub fn remote_id(&self) -> Option<i64> {
        self.data.get("id").and_then(serde_json::Value::as_i64)
    }
}

/// Spending limit for a category over a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Remote id once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Owning user
    pub user_id: i64,
    /// Category the limit applies to
    pub category_id: Option<i64>,
    /// Display title
    pub title: Option<String>,
    /// Limit
    pub amount: Decimal,
    /// Amount spent so far
    #[serde(default)]
    pub current_amount: Decimal,
    /// First day of the budget period
    pub start_date: NaiveDate,
    /// Last day of the budget period
    pub end_date: NaiveDate,
}

/// Whether a category groups income or expenses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    /// Money in
    Income,
    /// Money out
    Expense,
}

/// Income/expense grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Remote id once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Owning user
    pub user_id: i64,
    /// Display name
    pub name: String,
    /// Income or expense
    #[serde(rename = "type")]
    pub category_type: CategoryType,
    /// Optional icon name
    pub icon: Option<String>,
}

/// How often a transaction recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    /// Happens once
    OneTime,
    /// Every day
    Daily,
    /// Every week
    Weekly,
    /// Every month
    Monthly,
    /// Every year
    Yearly,
}

/// Income or expense entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Remote id once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Owning user
    pub user_id: i64,
    /// Category, if assigned
    pub category_id: Option<i64>,
    /// Signed amount
    pub amount: Decimal,
    /// Recurrence
    pub frequency: Frequency,
    /// When the transaction (first) happens
    pub start_date: NaiveDate,
    /// When a recurring transaction stops
    pub end_date: Option<NaiveDate>,
    /// Free text
    pub description: Option<String>,
}

/// User-facing alert, e.g. a budget crossing its warning threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Remote id once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Recipient
    pub user_id: i64,
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Whether the user has seen it
    #[serde(default)]
    pub is_read: bool,
}
