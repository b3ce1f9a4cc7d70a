//! Core sync engine and budgeting logic, independent of any UI or transport.

/// Budget utilization and financial health scoring
pub mod analytics;
/// Online/offline bridge to the sync manager
pub mod connectivity;
/// Sync lifecycle events
pub mod events;
/// Durable operation queue
pub mod queue;
/// Remote REST API seam
pub mod remote;
/// Persistent local record store
pub mod store;
/// Sync pass state machine
pub mod sync;
/// Progressive tax calculation
pub mod tax;
