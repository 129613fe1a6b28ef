//! Error types for the stream processor.

use sluice_state::DbError;
use sluice_types::{CodecError, PartitionId, Position, ProtocolVersion};
use thiserror::Error;

use crate::processor_map::RegistrationError;

/// Failure reported by a record processor or event applier.
///
/// The variant decides how the processing state machine reacts:
/// recoverable failures are retried after a delay, unrecoverable ones fail
/// the partition, anything else goes through the error-handling path.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("recoverable failure: {0}")]
    Recoverable(String),

    #[error("unrecoverable failure: {0}")]
    Unrecoverable(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ProcessingError {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self::Recoverable(reason.into())
    }

    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self::Unrecoverable(reason.into())
    }

    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{reason}"))
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }
}

impl From<DbError> for ProcessingError {
    fn from(error: DbError) -> Self {
        if error.is_recoverable() {
            Self::Recoverable(error.to_string())
        } else {
            Self::Failed(error.into())
        }
    }
}

impl From<CodecError> for ProcessingError {
    fn from(error: CodecError) -> Self {
        Self::Failed(error.into())
    }
}

/// Fatal failure of a partition's stream processor.
///
/// Any of these moves the partition to the failed phase.
#[derive(Debug, Error)]
pub enum StreamProcessorError {
    #[error("inconsistent log: read position {current} after {previous}")]
    InconsistentLog {
        previous: Position,
        current: Position,
    },

    #[error(
        "record at position {position} has protocol version {version}, but only {supported} is supported"
    )]
    UnsupportedProtocolVersion {
        position: Position,
        version: ProtocolVersion,
        supported: ProtocolVersion,
    },

    #[error("unrecoverable failure processing record at position {position}: {reason}")]
    Unrecoverable { position: Position, reason: String },

    #[error("failed to decode record at position {position}: {source}")]
    Decode {
        position: Position,
        source: CodecError,
    },

    #[error("state access failed: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("configured for partition {configured}, but the log belongs to partition {log}")]
    PartitionMismatch {
        configured: PartitionId,
        log: PartitionId,
    },

    #[error("lifecycle listener failed in {hook}: {source}")]
    Lifecycle {
        hook: &'static str,
        source: anyhow::Error,
    },

    #[error("stream processor is closing")]
    Aborted,

    #[error("stream processor task ended abnormally: {0}")]
    TaskFailed(String),
}

impl StreamProcessorError {
    /// Returns true if the error only reflects a requested shutdown.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}
