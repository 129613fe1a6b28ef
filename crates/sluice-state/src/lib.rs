//! # sluice-state: transactional partition state
//!
//! The embedded key-value store is an external collaborator; the stream
//! processor only needs [`TransactionContext`]: point reads and writes
//! grouped into one transaction per processed record, committed or rolled
//! back as a unit.
//!
//! On top of that interface this crate provides the state the stream
//! processor itself owns:
//!
//! - [`LastProcessedPositionState`]: position of the last committed command
//! - [`KeyGenerator`]: partition-scoped, strictly increasing entity keys
//! - [`BlacklistState`]: entities excluded from processing after a failure
//!
//! [`MemoryDb`] implements the interface in memory and can be captured as a
//! [`Snapshot`] and restored from one.
//!
//! # Committed vs Pending
//!
//! Writes go to a pending set and become visible to snapshots only on
//! commit. Reads inside a transaction see the pending writes first, so a
//! processor observes its own changes before commit.

mod blacklist;
mod db;
mod key_generator;
mod position;
mod snapshot;

use thiserror::Error;

pub use blacklist::BlacklistState;
pub use db::{ColumnFamily, MemoryDb, TransactionContext};
pub use key_generator::KeyGenerator;
pub use position::LastProcessedPositionState;
pub use snapshot::{Snapshot, SnapshotError};

/// Errors returned by [`TransactionContext`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// A transient failure; retrying the same operation may succeed.
    #[error("recoverable store failure: {0}")]
    Recoverable(String),

    #[error("store is closed")]
    Closed,

    #[error("corrupted value in {column_family}: {reason}")]
    Corrupted {
        column_family: ColumnFamily,
        reason: String,
    },

    #[error("store failure: {0}")]
    Other(String),
}

impl DbError {
    /// Returns true for the distinguished recoverable failure class.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }
}
