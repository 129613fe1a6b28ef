//! Fixtures shared by the unit tests of the state machines.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sluice_log::{
    LogAppendEntry, LogStream, LogStreamWriter, LogWriteError, LoggedRecord, MemoryLogStream,
};
use sluice_state::{ColumnFamily, MemoryDb, TransactionContext};
use sluice_types::{
    Intent, JobRecord, Key, PartitionId, Position, ProcessInstanceRecord, RecordValue,
    RecordValues, intent,
};

use crate::context::PartitionContext;
use crate::{
    EventApplier, NoopListener, ProcessingError, ProcessingMetrics, StreamProcessorListener,
    TypedRecord,
};

pub const APPLIED: ColumnFamily = ColumnFamily::Application(1);
const APPLIED_COUNT: &[u8] = b"applied-count";

pub fn partition() -> PartitionId {
    PartitionId::new(1)
}

pub fn instance(local: i64) -> Key {
    Key::from_partition_and_local(partition(), local)
}

pub fn context(db: Arc<MemoryDb>) -> PartitionContext {
    context_with_listener(db, Arc::new(NoopListener))
}

pub fn context_with_listener(
    db: Arc<MemoryDb>,
    listener: Arc<dyn StreamProcessorListener>,
) -> PartitionContext {
    PartitionContext {
        partition_id: partition(),
        db,
        values: Arc::new(RecordValues::new()),
        listener,
        metrics: Arc::new(ProcessingMetrics::new(partition())),
        abort: Arc::new(AtomicBool::new(false)),
        recoverable_retry_delay: Duration::from_millis(250),
    }
}

pub fn element(instance: Key) -> ProcessInstanceRecord {
    ProcessInstanceRecord {
        bpmn_process_id: "order-process".into(),
        version: 1,
        process_instance_key: instance,
        element_id: "start".into(),
        ..Default::default()
    }
}

pub fn activate(instance: Key) -> LogAppendEntry {
    LogAppendEntry::command(
        instance,
        intent::process_instance::ACTIVATE_ELEMENT,
        element(instance),
    )
}

pub fn activated(instance: Key) -> LogAppendEntry {
    LogAppendEntry::event(
        instance,
        intent::process_instance::ELEMENT_ACTIVATED,
        element(instance),
    )
}

pub fn complete_job(job: Key, instance: Key) -> LogAppendEntry {
    LogAppendEntry::command(
        job,
        intent::job::COMPLETE,
        JobRecord {
            job_type: "payment".into(),
            process_instance_key: instance,
            ..Default::default()
        },
    )
}

/// Appends `entries` as client records and returns the last position.
pub fn append(log: &MemoryLogStream, entries: &[LogAppendEntry]) -> Position {
    log.new_writer()
        .try_write(entries, Position::UNSET)
        .expect("append to memory log")
}

/// Appends `entries` as if written while processing `source`.
pub fn append_from(
    log: &MemoryLogStream,
    source: Position,
    entries: &[LogAppendEntry],
) -> Position {
    log.new_writer()
        .try_write(entries, source)
        .expect("append to memory log")
}

/// Records the element state per key and counts every application.
pub struct ElementStateApplier {
    db: Arc<dyn TransactionContext>,
}

impl ElementStateApplier {
    pub fn new(db: Arc<dyn TransactionContext>) -> Self {
        Self { db }
    }

    pub fn state_of(db: &dyn TransactionContext, key: Key) -> Option<Intent> {
        db.get(APPLIED, &key.as_i64().to_be_bytes())
            .expect("read applied state")
            .map(|bytes| Intent::new(bytes[0]))
    }

    pub fn applied_count(db: &dyn TransactionContext) -> u64 {
        db.get(APPLIED, APPLIED_COUNT)
            .expect("read applied count")
            .map_or(0, |bytes| u64::from_be_bytes(bytes.try_into().expect("u64")))
    }
}

impl EventApplier for ElementStateApplier {
    fn apply_state(
        &mut self,
        key: Key,
        intent: Intent,
        _value: &RecordValue,
    ) -> Result<(), ProcessingError> {
        self.db
            .put(APPLIED, &key.as_i64().to_be_bytes(), &[intent.as_u8()])?;
        let count = Self::applied_count(self.db.as_ref()) + 1;
        self.db.put(APPLIED, APPLIED_COUNT, &count.to_be_bytes())?;
        Ok(())
    }
}

/// Remembers what the stream processor reported.
#[derive(Default)]
pub struct RecordingListener {
    pub processed: Mutex<Vec<Position>>,
    pub skipped: Mutex<Vec<Position>>,
    pub replayed: Mutex<Vec<(Position, Position)>>,
}

impl RecordingListener {
    pub fn processed(&self) -> Vec<Position> {
        self.processed.lock().expect("lock").clone()
    }

    pub fn skipped(&self) -> Vec<Position> {
        self.skipped.lock().expect("lock").clone()
    }

    pub fn replayed(&self) -> Vec<(Position, Position)> {
        self.replayed.lock().expect("lock").clone()
    }
}

impl StreamProcessorListener for RecordingListener {
    fn on_processed(&self, record: &TypedRecord) {
        self.processed.lock().expect("lock").push(record.position());
    }

    fn on_skipped(&self, record: &LoggedRecord) {
        self.skipped.lock().expect("lock").push(record.position);
    }

    fn on_replayed(&self, position: Position, source_position: Position) {
        self.replayed
            .lock()
            .expect("lock")
            .push((position, source_position));
    }
}

/// Writer that fails with queued errors before delegating.
pub struct FlakyWriter {
    inner: Box<dyn LogStreamWriter>,
    failures: VecDeque<LogWriteError>,
    pub attempts: Arc<Mutex<u32>>,
}

impl FlakyWriter {
    pub fn new(log: &MemoryLogStream, failures: impl IntoIterator<Item = LogWriteError>) -> Self {
        Self {
            inner: log.new_writer(),
            failures: failures.into_iter().collect(),
            attempts: Arc::default(),
        }
    }
}

impl LogStreamWriter for FlakyWriter {
    fn try_write(
        &mut self,
        entries: &[LogAppendEntry],
        source_position: Position,
    ) -> Result<Position, LogWriteError> {
        *self.attempts.lock().expect("lock") += 1;
        match self.failures.pop_front() {
            Some(error) => Err(error),
            None => self.inner.try_write(entries, source_position),
        }
    }
}
