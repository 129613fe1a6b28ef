use sluice_types::{Intent, Key, RecordValue};

use crate::ProcessingError;

/// Applies the state change an event describes.
///
/// Used twice: while processing, for every follow-up event a processor
/// appends, and during replay, for every event read from the log. Both
/// paths must produce the same state, so implementations must be
/// deterministic and depend only on the event and the current state.
pub trait EventApplier: Send {
    fn apply_state(
        &mut self,
        key: Key,
        intent: Intent,
        value: &RecordValue,
    ) -> Result<(), ProcessingError>;
}

/// Applier for partitions whose processors keep no event-sourced state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventApplier;

impl EventApplier for NoopEventApplier {
    fn apply_state(
        &mut self,
        _key: Key,
        _intent: Intent,
        _value: &RecordValue,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }
}
