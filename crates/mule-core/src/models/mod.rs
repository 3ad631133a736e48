//! Data models for Mule

mod conflict;
mod metadata;
mod operation;
mod record;

pub use conflict::{Conflict, ConflictStatus, Resolution};
pub use metadata::{SyncMetadata, SyncMode};
pub use operation::{OperationKind, OperationStatus, QueuedOperation};
pub use record::{
    EntityRecord, GenericRecord, Partner, Product, RawRecord, PARTNER_ENTITY, PRODUCT_ENTITY,
};
