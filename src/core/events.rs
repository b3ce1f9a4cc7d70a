//! Sync lifecycle events for any number of listeners.

use crate::{core::sync::SyncReport, models::QueueOperation};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity; slow receivers skip ahead past the oldest events
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Everything observers can learn about the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pass began
    SyncStart,
    /// A pass finished, with or without per-operation failures
    SyncComplete(SyncReport),
    /// A pass aborted on a storage fault
    SyncError {
        /// Display form of the failure
        error: String,
    },
    /// A mutation was appended to the queue
    OperationQueued(QueueOperation),
    /// A queued mutation was acknowledged by the server
    OperationSynced(QueueOperation),
    /// Connectivity came back
    Online,
    /// Connectivity was lost
    Offline,
    /// The session error list was emptied
    ErrorsCleared,
}

/// Fire-and-forget publisher
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// A bus keeping at most `capacity` undelivered events per receiver
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Sends to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: SyncEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// New receiver that sees events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
