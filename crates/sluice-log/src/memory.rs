//! In-memory log stream.
//!
//! Records live in a shared, append-only `Vec` ordered by position. Readers
//! keep their own cursor; writers append atomically under the lock and
//! wake the consumer through a [`Notify`].
//!
//! # Backpressure
//!
//! A stream created with [`MemoryLogStream::with_capacity`] refuses batches
//! that would exceed the capacity with [`LogWriteError::Backpressure`],
//! the same contract a bounded queue offers its producers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sluice_types::{PartitionId, Position, RecordValues};
use tokio::sync::Notify;

use crate::{
    Clock, LogAppendEntry, LogStream, LogStreamReader, LogStreamWriter, LogWriteError,
    LoggedRecord, SystemClock,
};

struct Inner {
    partition_id: PartitionId,
    records: RwLock<Vec<LoggedRecord>>,
    capacity: Option<usize>,
    clock: Arc<dyn Clock>,
    record_available: Arc<Notify>,
    closed: AtomicBool,
}

impl Inner {
    fn records(&self) -> RwLockReadGuard<'_, Vec<LoggedRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn records_mut(&self) -> RwLockWriteGuard<'_, Vec<LoggedRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to an in-memory partition log. Cloning is cheap.
#[derive(Clone)]
pub struct MemoryLogStream {
    inner: Arc<Inner>,
}

impl MemoryLogStream {
    /// Creates an unbounded log using the system clock.
    pub fn new(partition_id: PartitionId) -> Self {
        Self::build(partition_id, None, Arc::new(SystemClock))
    }

    /// Creates a log that holds at most `capacity` records.
    pub fn with_capacity(partition_id: PartitionId, capacity: usize) -> Self {
        Self::build(partition_id, Some(capacity), Arc::new(SystemClock))
    }

    /// Returns an empty log with the same settings that timestamps records
    /// with `clock`. Meant to be chained directly after construction.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        let inner = &self.inner;
        Self::build(inner.partition_id, inner.capacity, clock)
    }

    fn build(partition_id: PartitionId, capacity: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                partition_id,
                records: RwLock::new(Vec::new()),
                capacity,
                clock,
                record_available: Arc::new(Notify::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Appends an already positioned record as-is.
    ///
    /// Used to import records from another log. No ordering checks are
    /// performed; consumers detect inconsistent positions themselves.
    pub fn append_raw(&self, record: LoggedRecord) {
        self.inner.records_mut().push(record);
        self.inner.record_available.notify_one();
    }

    /// Position of the last record, or [`Position::UNSET`] for an empty log.
    pub fn last_position(&self) -> Position {
        self.inner
            .records()
            .last()
            .map_or(Position::UNSET, |r| r.position)
    }

    pub fn len(&self) -> usize {
        self.inner.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records().is_empty()
    }

    /// Returns a copy of every record currently in the log.
    pub fn records(&self) -> Vec<LoggedRecord> {
        self.inner.records().clone()
    }

    /// Rejects all further writes.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryLogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLogStream")
            .field("partition_id", &self.inner.partition_id)
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

impl LogStream for MemoryLogStream {
    fn partition_id(&self) -> PartitionId {
        self.inner.partition_id
    }

    fn new_reader(&self) -> Box<dyn LogStreamReader> {
        Box::new(MemoryLogReader {
            inner: Arc::clone(&self.inner),
            next_index: 0,
        })
    }

    fn new_writer(&self) -> Box<dyn LogStreamWriter> {
        Box::new(MemoryLogWriter {
            inner: Arc::clone(&self.inner),
        })
    }

    fn record_available(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.record_available)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Cursor over a [`MemoryLogStream`].
pub struct MemoryLogReader {
    inner: Arc<Inner>,
    next_index: usize,
}

impl LogStreamReader for MemoryLogReader {
    fn has_next(&mut self) -> bool {
        self.next_index < self.inner.records().len()
    }

    fn next(&mut self) -> Option<LoggedRecord> {
        let record = self.inner.records().get(self.next_index).cloned()?;
        self.next_index += 1;
        Some(record)
    }

    fn seek(&mut self, position: Position) -> bool {
        let records = self.inner.records();
        self.next_index = records.partition_point(|r| r.position < position);
        records
            .get(self.next_index)
            .is_some_and(|r| r.position == position)
    }

    fn seek_to_next_record_after(&mut self, position: Position) -> bool {
        let records = self.inner.records();
        self.next_index = records.partition_point(|r| r.position <= position);
        self.next_index < records.len()
    }

    fn seek_to_first(&mut self) {
        self.next_index = 0;
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Appender for a [`MemoryLogStream`].
pub struct MemoryLogWriter {
    inner: Arc<Inner>,
}

impl LogStreamWriter for MemoryLogWriter {
    fn try_write(
        &mut self,
        entries: &[LogAppendEntry],
        source_position: Position,
    ) -> Result<Position, LogWriteError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(LogWriteError::Closed);
        }
        if entries.is_empty() {
            return Ok(Position::UNSET);
        }

        // Encode before taking the lock so a bad value appends nothing.
        let encoded = entries
            .iter()
            .map(|entry| RecordValues::encode(&entry.value))
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = self.inner.records_mut();
        if let Some(capacity) = self.inner.capacity {
            if records.len() + entries.len() > capacity {
                tracing::trace!(
                    partition_id = %self.inner.partition_id,
                    batch = entries.len(),
                    capacity,
                    "rejecting batch under backpressure"
                );
                return Err(LogWriteError::Backpressure);
            }
        }

        let timestamp = self.inner.clock.now();
        let mut position = records.last().map_or(Position::UNSET, |r| r.position);
        for (entry, value) in entries.iter().zip(encoded) {
            position = position.next();
            records.push(LoggedRecord {
                position,
                source_position,
                key: entry.key,
                timestamp,
                metadata: entry.metadata.clone(),
                value,
            });
        }
        drop(records);

        self.inner.record_available.notify_one();
        Ok(position)
    }
}
