//! Catalog enrichment runtime.

pub mod coordinator;

pub use coordinator::{EnrichSettings, EnrichmentCoordinator};

use crate::db_manager::StorageError;
use crate::protocol::{DetailResult, WorkItem};

/// Persistence consumed by the coordinator. Implementations must tolerate
/// concurrent calls from every worker.
pub trait EnrichmentStore: Send + Sync {
    fn get_all_records(&self) -> Result<Vec<WorkItem>, StorageError>;
    fn get_records_missing_details(&self) -> Result<Vec<WorkItem>, StorageError>;
    fn upsert_details(&self, app_id: u32, result: &DetailResult) -> Result<(), StorageError>;
}
