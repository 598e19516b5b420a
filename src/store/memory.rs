use super::SnapshotStore;
use crate::core::history::ReconciledRecord;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory snapshot store, lost when the process exits
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: Arc<Mutex<BTreeMap<NaiveDate, ReconciledRecord>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, record: &ReconciledRecord) -> Result<()> {
        let mut records = self.inner.lock().await;
        debug!(date = %record.date, "Snapshot SAVE");
        records.insert(record.date, record.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<ReconciledRecord>> {
        let records = self.inner.lock().await;
        Ok(records.values().next_back().cloned())
    }

    async fn range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ReconciledRecord>> {
        if start > end {
            return Ok(Vec::new());
        }
        let records = self.inner.lock().await;
        Ok(records.range(start..=end).map(|(_, r)| r.clone()).collect())
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut records = self.inner.lock().await;
        let kept = records.split_off(&cutoff);
        let removed = records.len();
        *records = kept;
        debug!(%cutoff, removed, "Snapshot PRUNE");
        Ok(removed)
    }
}
