use super::SnapshotStore;
use crate::core::history::ReconciledRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use std::path::Path;
use tracing::debug;

const PARTITION: &str = "snapshots";

/// Snapshot store backed by a fjall partition keyed by ISO date, so key
/// order is date order.
pub struct DiskSnapshotStore {
    _keyspace: Keyspace,
    partition: PartitionHandle,
}

fn date_key(date: NaiveDate) -> Vec<u8> {
    date.format("%Y-%m-%d").to_string().into_bytes()
}

impl DiskSnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        let keyspace = Config::new(path)
            .open()
            .with_context(|| format!("Failed to open snapshot store at {}", path.display()))?;
        let partition = keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;
        debug!(path = %path.display(), "Opened snapshot store");
        Ok(Self {
            _keyspace: keyspace,
            partition,
        })
    }
}

#[async_trait]
impl SnapshotStore for DiskSnapshotStore {
    async fn save(&self, record: &ReconciledRecord) -> Result<()> {
        self.partition
            .insert(date_key(record.date), serde_json::to_vec(record)?)?;
        debug!(date = %record.date, "Snapshot SAVE");
        Ok(())
    }

    async fn latest(&self) -> Result<Option<ReconciledRecord>> {
        match self.partition.last_key_value()? {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ReconciledRecord>> {
        if start > end {
            return Ok(Vec::new());
        }
        self.partition
            .range(date_key(start)..=date_key(end))
            .map(|item| -> Result<ReconciledRecord> {
                let (_, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let keys = self
            .partition
            .range(..date_key(cutoff))
            .map(|item| item.map(|(key, _)| key))
            .collect::<Result<Vec<_>, _>>()?;
        for key in &keys {
            self.partition.remove(key.clone())?;
        }
        debug!(%cutoff, removed = keys.len(), "Snapshot PRUNE");
        Ok(keys.len())
    }
}
