//! Point-in-time copies of committed partition state.
//!
//! A snapshot holds the committed store contents together with the last
//! processed position found in them. Replay starts right after that
//! position.
//!
//! # File Format
//!
//! ```text
//! ┌──────────┬─────────┬────────────────────────────┐
//! │ magic(4) │ ver(1)  │ postcard(SnapshotBody)     │
//! └──────────┴─────────┴────────────────────────────┘
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! crash never leaves a half-written snapshot under the final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sluice_types::Position;
use thiserror::Error;

use crate::position::{LAST_PROCESSED_KEY, decode_i64};
use crate::{ColumnFamily, DbError, MemoryDb};

const MAGIC: &[u8; 4] = b"SLSN";
const VERSION: u8 = 1;
const HEADER_SIZE: usize = MAGIC.len() + 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Codec(#[from] postcard::Error),

    #[error("not a snapshot file: {0}")]
    InvalidMagic(PathBuf),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),

    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SnapshotEntry {
    column_family: ColumnFamily,
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Committed partition state at a processed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    position: Position,
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Last processed position contained in this snapshot.
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&postcard::to_allocvec(self)?);

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        tracing::info!(
            path = %path.display(),
            position = %self.position,
            entries = self.entries.len(),
            "snapshot written"
        );
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let data = fs::read(path)?;
        if data.len() < HEADER_SIZE || &data[..MAGIC.len()] != MAGIC {
            return Err(SnapshotError::InvalidMagic(path.to_path_buf()));
        }
        let version = data[MAGIC.len()];
        if version != VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        Ok(postcard::from_bytes(&data[HEADER_SIZE..])?)
    }
}

impl MemoryDb {
    /// Captures the committed contents. Pending writes are not included.
    pub fn snapshot(&self) -> Result<Snapshot, SnapshotError> {
        let cf = ColumnFamily::LastProcessedPosition;
        let position = match self.committed_value(cf, LAST_PROCESSED_KEY) {
            Some(bytes) => Position::new(decode_i64(cf, &bytes)?),
            None => Position::UNSET,
        };
        let entries = self
            .committed_entries()
            .into_iter()
            .map(|((column_family, key), value)| SnapshotEntry {
                column_family,
                key,
                value,
            })
            .collect();
        Ok(Snapshot { position, entries })
    }

    /// Creates a store whose committed contents equal the snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::from_entries(
            snapshot
                .entries
                .iter()
                .map(|e| ((e.column_family, e.key.clone()), e.value.clone())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LastProcessedPositionState, TransactionContext};
    use std::sync::Arc;
    use tempfile::tempdir;

    const CF: ColumnFamily = ColumnFamily::Application(4);

    fn populated_db() -> Arc<MemoryDb> {
        let db = Arc::new(MemoryDb::new());
        LastProcessedPositionState::new(db.clone())
            .mark_as_processed(Position::new(12))
            .unwrap();
        db.put(CF, b"order-1", b"shipped").unwrap();
        db.commit().unwrap();
        db
    }

    #[test]
    fn snapshot_excludes_pending_writes() {
        let db = populated_db();
        db.put(CF, b"order-2", b"open").unwrap();
        LastProcessedPositionState::new(db.clone())
            .mark_as_processed(Position::new(13))
            .unwrap();

        let snapshot = db.snapshot().unwrap();

        assert_eq!(snapshot.position(), Position::new(12));
        let restored = MemoryDb::from_snapshot(&snapshot);
        assert_eq!(restored.get(CF, b"order-1").unwrap(), Some(b"shipped".to_vec()));
        assert_eq!(restored.get(CF, b"order-2").unwrap(), None);
    }

    #[test]
    fn empty_store_snapshots_unset_position() {
        let snapshot = MemoryDb::new().snapshot().unwrap();
        assert_eq!(snapshot.position(), Position::UNSET);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn snapshot_file_survives_reload() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("snapshot.bin");
        let snapshot = populated_db().snapshot().unwrap();

        snapshot.write_to(&path).unwrap();
        let loaded = Snapshot::read_from(&path).unwrap();

        assert_eq!(loaded, snapshot);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("not-a-snapshot");
        fs::write(&path, b"hello world").unwrap();

        assert!(matches!(
            Snapshot::read_from(&path),
            Err(SnapshotError::InvalidMagic(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("snapshot.bin");
        fs::write(&path, [b'S', b'L', b'S', b'N', 9]).unwrap();

        assert!(matches!(
            Snapshot::read_from(&path),
            Err(SnapshotError::UnsupportedVersion(9))
        ));
    }
}
