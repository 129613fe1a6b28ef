//! # sluice-log: the partition log as seen by the stream processor
//!
//! The durable, replicated log is an external collaborator. This crate
//! defines the narrow interface the stream processor consumes:
//!
//! - [`LogStreamReader`]: sequential reads with seek
//! - [`LogStreamWriter`]: atomic batch appends that report the highest
//!   assigned position
//! - [`LogStream`]: creates readers and writers and signals new records
//!
//! [`MemoryLogStream`] is a complete in-memory implementation used to run
//! the processor without a storage engine (tests, embedding, tooling).
//!
//! # Position Semantics
//!
//! Positions are assigned by the log on append, start at
//! [`Position::FIRST`](sluice_types::Position::FIRST) and grow by one per
//! record. A reader never observes positions going backwards unless the
//! log itself is inconsistent; the stream processor treats that as fatal.

mod clock;
mod memory;
mod record;

use std::sync::Arc;

use sluice_types::{PartitionId, Position};
use thiserror::Error;
use tokio::sync::Notify;

pub use clock::{Clock, ControlledClock, SystemClock};
pub use memory::{MemoryLogReader, MemoryLogStream, MemoryLogWriter};
pub use record::{LogAppendEntry, LoggedRecord};

/// Errors returned by [`LogStreamWriter::try_write`].
#[derive(Debug, Error)]
pub enum LogWriteError {
    /// The log cannot accept the batch right now; try again later.
    #[error("log is under backpressure")]
    Backpressure,

    #[error("log stream is closed")]
    Closed,

    #[error(transparent)]
    Encode(#[from] sluice_types::CodecError),
}

impl LogWriteError {
    /// Returns true if a later attempt with the same batch can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backpressure)
    }
}

/// Sequential reader over a partition's log.
pub trait LogStreamReader: Send {
    /// Returns true if [`next`](Self::next) would return a record.
    fn has_next(&mut self) -> bool;

    /// Returns the next record and advances the cursor.
    fn next(&mut self) -> Option<LoggedRecord>;

    /// Moves the cursor so that the next record returned is the one at
    /// `position`, or the first one after it.
    ///
    /// Returns true if a record with exactly this position exists.
    fn seek(&mut self, position: Position) -> bool;

    /// Moves the cursor to the first record strictly after `position`.
    ///
    /// Returns false if no such record exists (the cursor is then at the
    /// end of the log).
    fn seek_to_next_record_after(&mut self, position: Position) -> bool;

    /// Moves the cursor to the start of the log.
    fn seek_to_first(&mut self);
}

/// Appends batches of records to a partition's log.
pub trait LogStreamWriter: Send {
    /// Appends `entries` atomically.
    ///
    /// Every appended record gets `source_position` as its source. Returns
    /// the highest position assigned. An empty batch appends nothing and
    /// returns [`Position::UNSET`].
    fn try_write(
        &mut self,
        entries: &[LogAppendEntry],
        source_position: Position,
    ) -> Result<Position, LogWriteError>;
}

/// A partition's log.
pub trait LogStream: Send + Sync {
    fn partition_id(&self) -> PartitionId;

    fn new_reader(&self) -> Box<dyn LogStreamReader>;

    fn new_writer(&self) -> Box<dyn LogStreamWriter>;

    /// Notified whenever new records become readable.
    fn record_available(&self) -> Arc<Notify>;
}
