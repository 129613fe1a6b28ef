//! Business logic plug-in point.

use sluice_log::LogAppendEntry;
use sluice_state::{KeyGenerator, TransactionContext};
use sluice_types::{
    Intent, Key, PartitionId, Position, RecordMetadata, RecordValue, RejectionType,
};

use crate::lifecycle::{ReadonlyContext, StreamProcessorLifecycleAware};
use crate::{EventApplier, ProcessingError, ProcessingResponse, ProcessingResult, TypedRecord};

/// Processes one kind of command.
///
/// `process` runs inside the command's transaction. Every state change it
/// makes (directly through [`ProcessingContext::state`] or through appended
/// events) commits or rolls back together with the command.
pub trait RecordProcessor: StreamProcessorLifecycleAware {
    fn process(
        &mut self,
        record: &TypedRecord,
        context: &mut ProcessingContext<'_>,
    ) -> Result<(), ProcessingError>;
}

/// What a processor can do while processing a command.
pub struct ProcessingContext<'a> {
    partition_id: PartitionId,
    position: Position,
    result: &'a mut ProcessingResult,
    key_generator: &'a KeyGenerator,
    event_applier: &'a mut dyn EventApplier,
    state: &'a dyn TransactionContext,
}

impl<'a> ProcessingContext<'a> {
    pub(crate) fn new(
        partition_id: PartitionId,
        position: Position,
        result: &'a mut ProcessingResult,
        key_generator: &'a KeyGenerator,
        event_applier: &'a mut dyn EventApplier,
        state: &'a dyn TransactionContext,
    ) -> Self {
        Self {
            partition_id,
            position,
            result,
            key_generator,
            event_applier,
            state,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Position of the command being processed.
    pub fn position(&self) -> Position {
        self.position
    }

    /// The command's transaction, for processor-owned column families.
    pub fn state(&self) -> &dyn TransactionContext {
        self.state
    }

    pub fn next_key(&mut self) -> Result<Key, ProcessingError> {
        Ok(self.key_generator.next_key()?)
    }

    /// Applies `value` to state and appends it as a follow-up event.
    pub fn append_event(
        &mut self,
        key: Key,
        intent: Intent,
        value: impl Into<RecordValue>,
    ) -> Result<(), ProcessingError> {
        let value = value.into();
        self.event_applier.apply_state(key, intent, &value)?;
        self.result
            .append_record(LogAppendEntry::event(key, intent, value));
        Ok(())
    }

    /// Appends a follow-up command, processed later on this partition.
    pub fn append_command(&mut self, key: Key, intent: Intent, value: impl Into<RecordValue>) {
        self.result
            .append_record(LogAppendEntry::command(key, intent, value));
    }

    /// Rejects `command`: appends the rejection record and, if the command
    /// came from a client, stages the rejection response.
    pub fn append_rejection(
        &mut self,
        command: &TypedRecord,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) {
        let metadata = command
            .metadata()
            .clone()
            .with_rejection(rejection_type, reason);
        self.stage_response(command, command.key(), metadata.clone(), command.value().clone());
        self.result.append_record(LogAppendEntry {
            key: command.key(),
            metadata,
            value: command.value().clone(),
        });
    }

    /// Stages an event-shaped response to `command`. Does nothing for
    /// commands that did not come from a client.
    pub fn respond(
        &mut self,
        command: &TypedRecord,
        key: Key,
        intent: Intent,
        value: impl Into<RecordValue>,
    ) {
        let value = value.into();
        let metadata = RecordMetadata::event(value.value_type(), intent);
        self.stage_response(command, key, metadata, value);
    }

    /// Replaces the default side effect of sending the response.
    pub fn set_side_effect(&mut self, side_effect: impl FnMut() -> bool + Send + 'static) {
        self.result.set_side_effect(Box::new(side_effect));
    }

    fn stage_response(
        &mut self,
        command: &TypedRecord,
        key: Key,
        metadata: RecordMetadata,
        value: RecordValue,
    ) {
        if let Some(request) = command.request() {
            self.result.set_response(ProcessingResponse {
                partition_id: self.partition_id,
                request,
                key,
                metadata,
                value,
            });
        }
    }
}

/// Adapts a closure into a [`RecordProcessor`] that ignores lifecycle
/// transitions.
pub struct FnProcessor<F> {
    process: F,
}

impl<F> FnProcessor<F>
where
    F: FnMut(&TypedRecord, &mut ProcessingContext<'_>) -> Result<(), ProcessingError> + Send,
{
    pub fn new(process: F) -> Self {
        Self { process }
    }
}

impl<F: Send> StreamProcessorLifecycleAware for FnProcessor<F> {
    fn on_recovered(&mut self, _context: &ReadonlyContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_paused(&mut self) {}

    fn on_resumed(&mut self) {}

    fn on_failed(&mut self) {}

    fn on_close(&mut self) {}
}

impl<F> RecordProcessor for FnProcessor<F>
where
    F: FnMut(&TypedRecord, &mut ProcessingContext<'_>) -> Result<(), ProcessingError> + Send,
{
    fn process(
        &mut self,
        record: &TypedRecord,
        context: &mut ProcessingContext<'_>,
    ) -> Result<(), ProcessingError> {
        (self.process)(record, context)
    }
}
