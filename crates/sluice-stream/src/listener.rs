use sluice_log::LoggedRecord;
use sluice_types::Position;

use crate::TypedRecord;

/// Observes records as the stream processor finishes with them.
///
/// Called on the partition's task; implementations must not block.
pub trait StreamProcessorListener: Send + Sync {
    /// A command was processed and its transaction committed.
    fn on_processed(&self, _record: &TypedRecord) {}

    /// A record was read but not processed.
    fn on_skipped(&self, _record: &LoggedRecord) {}

    /// An event was applied during replay.
    fn on_replayed(&self, _position: Position, _source_position: Position) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl StreamProcessorListener for NoopListener {}
