//! The working record handed to processors and appliers.

use bytes::Bytes;
use sluice_log::LoggedRecord;
use sluice_types::{
    Intent, Key, Position, ProtocolVersion, RecordKind, RecordMetadata, RecordValue,
    RequestMetadata, Timestamp, ValueType,
};

/// A log record together with its decoded value.
///
/// The state machines own one `TypedRecord` each and re-wrap it for every
/// record they read. Processors only ever get a shared borrow for the
/// duration of one call, so a record cannot be retained across records;
/// use [`TypedRecord::copy`] to keep one.
#[derive(Debug)]
pub struct TypedRecord {
    position: Position,
    source_position: Position,
    key: Key,
    timestamp: Timestamp,
    metadata: RecordMetadata,
    raw_value: Bytes,
    value: RecordValue,
}

impl TypedRecord {
    pub fn new(record: &LoggedRecord, value: RecordValue) -> Self {
        Self {
            position: record.position,
            source_position: record.source_position,
            key: record.key,
            timestamp: record.timestamp,
            metadata: record.metadata.clone(),
            raw_value: record.value.clone(),
            value,
        }
    }

    /// Points this record at `record`, reusing existing allocations.
    pub fn wrap(&mut self, record: &LoggedRecord, value: RecordValue) {
        self.position = record.position;
        self.source_position = record.source_position;
        self.key = record.key;
        self.timestamp = record.timestamp;
        self.metadata.clone_from(&record.metadata);
        self.raw_value = record.value.clone();
        self.value = value;
    }

    /// Wraps `record` into `slot`, creating the reusable record on first use.
    pub(crate) fn wrap_into<'a>(
        slot: &'a mut Option<TypedRecord>,
        record: &LoggedRecord,
        value: RecordValue,
    ) -> &'a TypedRecord {
        let typed = match slot.take() {
            Some(mut typed) => {
                typed.wrap(record, value);
                typed
            }
            None => TypedRecord::new(record, value),
        };
        slot.insert(typed)
    }

    /// Deep copy that owns all of its data.
    pub fn copy(&self) -> CopiedRecord {
        CopiedRecord {
            position: self.position,
            source_position: self.source_position,
            key: self.key,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
            raw_value: Bytes::copy_from_slice(&self.raw_value),
            value: self.value.clone(),
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn source_position(&self) -> Position {
        self.source_position
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    pub fn kind(&self) -> RecordKind {
        self.metadata.kind
    }

    pub fn value_type(&self) -> ValueType {
        self.metadata.value_type
    }

    pub fn intent(&self) -> Intent {
        self.metadata.intent
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.metadata.protocol_version
    }

    pub fn request(&self) -> Option<RequestMetadata> {
        self.metadata.request
    }

    pub fn value(&self) -> &RecordValue {
        &self.value
    }
}

/// An owned copy of a [`TypedRecord`], safe to keep beyond the current
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedRecord {
    pub position: Position,
    pub source_position: Position,
    pub key: Key,
    pub timestamp: Timestamp,
    pub metadata: RecordMetadata,
    pub raw_value: Bytes,
    pub value: RecordValue,
}
