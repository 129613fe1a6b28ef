use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::DbError;

/// Namespace of a key in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnFamily {
    LastProcessedPosition,
    KeyGenerator,
    Blacklist,
    /// Column families owned by record processors and event appliers.
    Application(u16),
}

impl Display for ColumnFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LastProcessedPosition => write!(f, "LAST_PROCESSED_POSITION"),
            Self::KeyGenerator => write!(f, "KEY_GENERATOR"),
            Self::Blacklist => write!(f, "BLACKLIST"),
            Self::Application(id) => write!(f, "APPLICATION_{id}"),
        }
    }
}

/// The transaction seen by the stream processor.
///
/// All mutations since the last `commit`/`rollback` form one transaction.
/// Methods take `&self`; implementations synchronize internally so that
/// several state wrappers can share one context.
pub trait TransactionContext: Send + Sync {
    fn get(&self, column_family: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, DbError>;

    fn put(&self, column_family: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), DbError>;

    fn delete(&self, column_family: ColumnFamily, key: &[u8]) -> Result<(), DbError>;

    /// Returns every key of a column family, including pending writes.
    fn keys(&self, column_family: ColumnFamily) -> Result<Vec<Vec<u8>>, DbError>;

    /// Makes all pending writes durable and visible atomically.
    fn commit(&self) -> Result<(), DbError>;

    /// Discards all pending writes.
    fn rollback(&self) -> Result<(), DbError>;

    fn exists(&self, column_family: ColumnFamily, key: &[u8]) -> Result<bool, DbError> {
        Ok(self.get(column_family, key)?.is_some())
    }
}

type Entry = (ColumnFamily, Vec<u8>);

#[derive(Default)]
struct DbState {
    committed: BTreeMap<Entry, Vec<u8>>,
    /// `None` marks a pending delete.
    pending: BTreeMap<Entry, Option<Vec<u8>>>,
    closed: bool,
}

impl DbState {
    fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }
}

/// In-memory [`TransactionContext`] with a pending write set over the
/// committed contents.
#[derive(Default)]
pub struct MemoryDb {
    state: Mutex<DbState>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (Entry, Vec<u8>)>) -> Self {
        Self {
            state: Mutex::new(DbState {
                committed: entries.into_iter().collect(),
                ..DbState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DbState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the committed contents, ignoring any open transaction.
    pub(crate) fn committed_entries(&self) -> Vec<(Entry, Vec<u8>)> {
        self.state()
            .committed
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn committed_value(
        &self,
        column_family: ColumnFamily,
        key: &[u8],
    ) -> Option<Vec<u8>> {
        self.state()
            .committed
            .get(&(column_family, key.to_vec()))
            .cloned()
    }

    /// Returns true if writes are waiting for commit or rollback.
    pub fn has_pending_writes(&self) -> bool {
        !self.state().pending.is_empty()
    }

    /// Rejects all further operations with [`DbError::Closed`].
    pub fn close(&self) {
        self.state().closed = true;
    }
}

impl TransactionContext for MemoryDb {
    fn get(&self, column_family: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let state = self.state();
        state.ensure_open()?;
        let entry = (column_family, key.to_vec());
        match state.pending.get(&entry) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(state.committed.get(&entry).cloned()),
        }
    }

    fn put(&self, column_family: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let mut state = self.state();
        state.ensure_open()?;
        state
            .pending
            .insert((column_family, key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, column_family: ColumnFamily, key: &[u8]) -> Result<(), DbError> {
        let mut state = self.state();
        state.ensure_open()?;
        state.pending.insert((column_family, key.to_vec()), None);
        Ok(())
    }

    fn keys(&self, column_family: ColumnFamily) -> Result<Vec<Vec<u8>>, DbError> {
        let state = self.state();
        state.ensure_open()?;
        let mut keys: BTreeMap<&[u8], bool> = state
            .committed
            .keys()
            .filter(|(cf, _)| *cf == column_family)
            .map(|(_, k)| (k.as_slice(), true))
            .collect();
        for ((cf, key), value) in &state.pending {
            if *cf == column_family {
                keys.insert(key.as_slice(), value.is_some());
            }
        }
        Ok(keys
            .into_iter()
            .filter_map(|(k, present)| present.then(|| k.to_vec()))
            .collect())
    }

    fn commit(&self) -> Result<(), DbError> {
        let mut state = self.state();
        state.ensure_open()?;
        let pending = std::mem::take(&mut state.pending);
        for (entry, value) in pending {
            match value {
                Some(value) => {
                    state.committed.insert(entry, value);
                }
                None => {
                    state.committed.remove(&entry);
                }
            }
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), DbError> {
        let mut state = self.state();
        state.ensure_open()?;
        state.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CF: ColumnFamily = ColumnFamily::Application(1);

    #[test]
    fn reads_see_pending_writes() {
        let db = MemoryDb::new();
        db.put(CF, b"a", b"1").unwrap();

        assert_eq!(db.get(CF, b"a").unwrap(), Some(b"1".to_vec()));
        assert!(db.has_pending_writes());
        assert!(db.committed_value(CF, b"a").is_none());
    }

    #[test]
    fn rollback_discards_pending_writes() {
        let db = MemoryDb::new();
        db.put(CF, b"a", b"1").unwrap();
        db.commit().unwrap();

        db.put(CF, b"a", b"2").unwrap();
        db.delete(CF, b"a").unwrap();
        db.put(CF, b"b", b"3").unwrap();
        db.rollback().unwrap();

        assert_eq!(db.get(CF, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(CF, b"b").unwrap(), None);
        assert!(!db.has_pending_writes());
    }

    #[test]
    fn commit_applies_deletes() {
        let db = MemoryDb::new();
        db.put(CF, b"a", b"1").unwrap();
        db.commit().unwrap();

        db.delete(CF, b"a").unwrap();
        assert!(!db.exists(CF, b"a").unwrap());
        db.commit().unwrap();

        assert!(db.committed_value(CF, b"a").is_none());
    }

    #[test]
    fn keys_merge_committed_and_pending() {
        let db = MemoryDb::new();
        db.put(CF, b"a", b"").unwrap();
        db.put(CF, b"b", b"").unwrap();
        db.put(ColumnFamily::Blacklist, b"x", b"").unwrap();
        db.commit().unwrap();

        db.delete(CF, b"a").unwrap();
        db.put(CF, b"c", b"").unwrap();

        assert_eq!(db.keys(CF).unwrap(), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn closed_db_rejects_operations() {
        let db = MemoryDb::new();
        db.close();

        assert_eq!(db.get(CF, b"a"), Err(DbError::Closed));
        assert_eq!(db.commit(), Err(DbError::Closed));
    }
}
