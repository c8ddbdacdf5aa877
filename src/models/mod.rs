//! # Data Models
//!
//! SeaORM entities for the monitor tables plus the service info response.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod log_entry;
pub mod snapshot;
pub mod snapshot_chunk;
pub mod snapshot_file;
pub mod step;
pub mod transaction;

pub use log_entry::Entity as LogEntryEntity;
pub use snapshot::Entity as SnapshotEntity;
pub use snapshot_chunk::Entity as SnapshotChunk;
pub use snapshot_file::Entity as SnapshotFile;
pub use step::Entity as StepEntity;
pub use transaction::Entity as TransactionEntity;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "flow-monitor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
