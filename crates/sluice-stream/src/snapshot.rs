//! Snapshot files of one partition under the configured snapshot directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sluice_config::{Paths, SluiceConfig};
use sluice_state::{MemoryDb, Snapshot, SnapshotError};
use sluice_types::PartitionId;

const EXTENSION: &str = "snapshot";

/// Where a partition writes its snapshots and restores from on restart.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    directory: PathBuf,
    partition_id: PartitionId,
}

impl SnapshotStore {
    pub fn new(directory: impl Into<PathBuf>, partition_id: PartitionId) -> Self {
        Self {
            directory: directory.into(),
            partition_id,
        }
    }

    pub fn from_config(config: &SluiceConfig) -> Self {
        Self::new(
            config.snapshot.directory.clone(),
            PartitionId::new(config.partition.id),
        )
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Writes the committed contents of `db`, named by its processed position.
    pub fn persist(&self, db: &MemoryDb) -> Result<PathBuf, SnapshotError> {
        let snapshot = db.snapshot()?;
        fs::create_dir_all(self.partition_dir())?;
        let path = Paths::snapshot_file(
            &self.directory,
            self.partition_id.as_u16(),
            snapshot.position().as_i64(),
        );
        snapshot.write_to(&path)?;
        Ok(path)
    }

    /// The snapshot with the highest processed position, if any.
    pub fn latest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let entries = match fs::read_dir(self.partition_dir()) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        // Zero-padded names sort by position.
        let mut newest: Option<PathBuf> = None;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION)
                && newest.as_ref().is_none_or(|current| path > *current)
            {
                newest = Some(path);
            }
        }
        newest.map(|path| Snapshot::read_from(&path)).transpose()
    }

    /// A store seeded from the latest snapshot, or an empty one.
    pub fn restore(&self) -> Result<MemoryDb, SnapshotError> {
        match self.latest()? {
            Some(snapshot) => {
                tracing::info!(
                    partition_id = %self.partition_id,
                    position = %snapshot.position(),
                    "restoring state from snapshot"
                );
                Ok(MemoryDb::from_snapshot(&snapshot))
            }
            None => Ok(MemoryDb::new()),
        }
    }

    fn partition_dir(&self) -> PathBuf {
        Paths::snapshot_dir(&self.directory, self.partition_id.as_u16())
    }
}
