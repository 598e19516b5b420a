pub mod disk;
pub mod memory;

use crate::core::config::AppConfig;
use crate::core::history::ReconciledRecord;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use disk::DiskSnapshotStore;
use memory::MemorySnapshotStore;
use std::sync::Arc;
use tracing::warn;

/// Daily reconciled snapshots, at most one per date.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Inserts or replaces the record for `record.date`.
    async fn save(&self, record: &ReconciledRecord) -> Result<()>;

    /// The most recent record by date.
    async fn latest(&self) -> Result<Option<ReconciledRecord>>;

    /// Records dated within `[start, end]`, ascending.
    async fn range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ReconciledRecord>>;

    /// Deletes records dated before `cutoff`. Returns how many were deleted.
    async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize>;
}

/// Opens the on-disk store under the configured data path, falling back to a
/// process-local store when the disk store cannot be opened.
pub fn open(config: &AppConfig) -> Arc<dyn SnapshotStore> {
    let disk = config
        .default_data_path()
        .and_then(|path| DiskSnapshotStore::open(&path.join("snapshots")));

    match disk {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Snapshot store unavailable, keeping snapshots in memory");
            Arc::new(MemorySnapshotStore::new())
        }
    }
}
