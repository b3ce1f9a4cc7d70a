//! Unified error types for the sync engine.
//!
//! Storage faults, configuration problems and remote failures all funnel into
//! [`Error`] so callers can propagate with `?` and report a single type.

use crate::core::remote::ApiError;
use thiserror::Error;

/// Errors that can occur anywhere in the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description of the problem
        message: String,
    },

    /// Storage engine failure (quota, corruption, constraint violation)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A local record addressed by id does not exist in its collection
    #[error("{collection} record {id} not found")]
    RecordNotFound {
        /// Collection the lookup ran against
        collection: String,
        /// Local id that was requested
        id: i64,
    },

    /// A queue operation addressed by id does not exist
    #[error("Queue operation {id} not found")]
    OperationNotFound {
        /// Queue id that was requested
        id: i64,
    },

    /// A status change the queue refuses to make
    #[error("Invalid status transition for operation {id}: {from} -> {to}")]
    InvalidTransition {
        /// Queue id of the operation
        id: i64,
        /// Stored status
        from: String,
        /// Requested status
        to: String,
    },

    /// A stored value could not be mapped back to its domain type
    #[error("Corrupt stored value: {message}")]
    CorruptValue {
        /// What was wrong with the value
        message: String,
    },

    /// Remote API failure
    #[error("Remote API error: {0}")]
    Api(#[from] ApiError),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a corrupt stored value
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptValue {
            message: message.into(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
