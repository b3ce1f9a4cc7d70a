//! Entity module - Contains all SeaORM entity definitions for the database.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod local_record;
pub mod sync_operation;

pub use local_record::{
    Column as LocalRecordColumn, Entity as LocalRecord, Model as LocalRecordModel,
};
pub use sync_operation::{
    Column as SyncOperationColumn, Entity as SyncOperation, Model as SyncOperationModel,
};
