use bytes::Bytes;
use sluice_types::{
    Intent, Key, Position, RecordKind, RecordMetadata, RecordValue, RejectionType, Timestamp,
    ValueType,
};

/// A record as it is stored in the log.
///
/// The payload stays encoded; the stream processor decodes it with the
/// value type from `metadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRecord {
    pub position: Position,
    /// Position of the command whose processing produced this record, or
    /// [`Position::UNSET`] for records written by clients.
    pub source_position: Position,
    pub key: Key,
    pub timestamp: Timestamp,
    pub metadata: RecordMetadata,
    pub value: Bytes,
}

impl LoggedRecord {
    pub fn kind(&self) -> RecordKind {
        self.metadata.kind
    }

    pub fn value_type(&self) -> ValueType {
        self.metadata.value_type
    }

    pub fn intent(&self) -> Intent {
        self.metadata.intent
    }
}

/// A record to be appended. Position, source position and timestamp are
/// assigned by the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAppendEntry {
    pub key: Key,
    pub metadata: RecordMetadata,
    pub value: RecordValue,
}

impl LogAppendEntry {
    pub fn new(key: Key, metadata: RecordMetadata, value: impl Into<RecordValue>) -> Self {
        Self {
            key,
            metadata,
            value: value.into(),
        }
    }

    pub fn command(key: Key, intent: Intent, value: impl Into<RecordValue>) -> Self {
        let value = value.into();
        let metadata = RecordMetadata::command(value.value_type(), intent);
        Self {
            key,
            metadata,
            value,
        }
    }

    pub fn event(key: Key, intent: Intent, value: impl Into<RecordValue>) -> Self {
        let value = value.into();
        let metadata = RecordMetadata::event(value.value_type(), intent);
        Self {
            key,
            metadata,
            value,
        }
    }

    pub fn rejection(
        key: Key,
        intent: Intent,
        value: impl Into<RecordValue>,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) -> Self {
        let value = value.into();
        let metadata = RecordMetadata::command(value.value_type(), intent)
            .with_rejection(rejection_type, reason);
        Self {
            key,
            metadata,
            value,
        }
    }
}
