//! Shared fixtures for the stream processor integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use sluice_log::{LogAppendEntry, LogStream, MemoryLogStream};
use sluice_state::{ColumnFamily, DbError, MemoryDb, TransactionContext};
use sluice_stream::{
    EventApplier, FnProcessor, ProcessingContext, ProcessingError, ReadonlyContext,
    RecordProcessor, StreamProcessorLifecycleAware, TypedRecord,
};
use sluice_types::{
    Intent, Key, PartitionId, Position, ProcessInstanceRecord, RecordValue, RequestMetadata,
    intent,
};

const ELEMENTS: ColumnFamily = ColumnFamily::Application(7);

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness; `RUST_LOG` filters it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn partition() -> PartitionId {
    PartitionId::new(2)
}

pub fn instance(local: i64) -> Key {
    Key::from_partition_and_local(partition(), local)
}

pub fn element(instance: Key) -> ProcessInstanceRecord {
    ProcessInstanceRecord {
        bpmn_process_id: "shipping".into(),
        version: 3,
        process_instance_key: instance,
        element_id: "pack-parcel".into(),
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

pub fn complete(instance: Key) -> LogAppendEntry {
    LogAppendEntry::command(
        instance,
        intent::process_instance::COMPLETE_ELEMENT,
        element(instance),
    )
}

pub fn with_request(mut entry: LogAppendEntry, request_id: u64) -> LogAppendEntry {
    entry.metadata = entry.metadata.with_request(RequestMetadata {
        request_id,
        request_stream_id: 1,
    });
    entry
}

/// Appends client commands and returns the last assigned position.
pub fn append(log: &MemoryLogStream, entries: &[LogAppendEntry]) -> Position {
    log.new_writer()
        .try_write(entries, Position::UNSET)
        .expect("append to memory log")
}

/// Polls `condition` until it holds, panicking after `timeout`.
pub async fn await_condition(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Keeps the intent of the last event applied per element.
pub struct ElementApplier {
    db: Arc<dyn TransactionContext>,
}

impl ElementApplier {
    pub fn new(db: Arc<dyn TransactionContext>) -> Self {
        Self { db }
    }

    pub fn state_of(db: &dyn TransactionContext, key: Key) -> Option<Intent> {
        db.get(ELEMENTS, &key.as_i64().to_be_bytes())
            .expect("read element state")
            .map(|bytes| Intent::new(bytes[0]))
    }
}

impl EventApplier for ElementApplier {
    fn apply_state(
        &mut self,
        key: Key,
        intent: Intent,
        _value: &RecordValue,
    ) -> Result<(), ProcessingError> {
        self.db
            .put(ELEMENTS, &key.as_i64().to_be_bytes(), &[intent.as_u8()])?;
        Ok(())
    }
}

/// Processor that activates elements and answers the client.
pub fn activating() -> impl RecordProcessor + 'static {
    FnProcessor::new(
        |record: &TypedRecord, context: &mut ProcessingContext<'_>| {
            let instance = record.key();
            context.append_event(
                instance,
                intent::process_instance::ELEMENT_ACTIVATED,
                element(instance),
            )?;
            context.respond(
                record,
                instance,
                intent::process_instance::ELEMENT_ACTIVATED,
                element(instance),
            );
            Ok(())
        },
    )
}

/// Records every lifecycle transition it sees.
#[derive(Clone, Default)]
pub struct LifecycleLog {
    events: Arc<Mutex<Vec<&'static str>>>,
    fail_recovery: bool,
}

impl LifecycleLog {
    pub fn failing_recovery() -> Self {
        Self {
            fail_recovery: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().expect("lock").clone()
    }

    fn push(&self, event: &'static str) {
        self.events.lock().expect("lock").push(event);
    }
}

impl StreamProcessorLifecycleAware for LifecycleLog {
    fn on_recovered(&mut self, _context: &ReadonlyContext) -> anyhow::Result<()> {
        self.push("recovered");
        if self.fail_recovery {
            anyhow::bail!("cannot load deployments");
        }
        Ok(())
    }

    fn on_paused(&mut self) {
        self.push("paused");
    }

    fn on_resumed(&mut self) {
        self.push("resumed");
    }

    fn on_failed(&mut self) {
        self.push("failed");
    }

    fn on_close(&mut self) {
        self.push("closed");
    }
}

/// Store whose commits fail recoverably a given number of times.
pub struct FlakyDb {
    inner: MemoryDb,
    failing_commits: AtomicU32,
    pub failed_commits: AtomicU32,
}

impl FlakyDb {
    pub fn new(failing_commits: u32) -> Self {
        Self {
            inner: MemoryDb::new(),
            failing_commits: AtomicU32::new(failing_commits),
            failed_commits: AtomicU32::new(0),
        }
    }
}

impl TransactionContext for FlakyDb {
    fn get(&self, column_family: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.inner.get(column_family, key)
    }

    fn put(&self, column_family: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.inner.put(column_family, key, value)
    }

    fn delete(&self, column_family: ColumnFamily, key: &[u8]) -> Result<(), DbError> {
        self.inner.delete(column_family, key)
    }

    fn keys(&self, column_family: ColumnFamily) -> Result<Vec<Vec<u8>>, DbError> {
        self.inner.keys(column_family)
    }

    fn commit(&self) -> Result<(), DbError> {
        let remaining = self.failing_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_commits.store(remaining - 1, Ordering::SeqCst);
            self.failed_commits.fetch_add(1, Ordering::SeqCst);
            return Err(DbError::Recoverable("write stall".into()));
        }
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), DbError> {
        self.inner.rollback()
    }
}
