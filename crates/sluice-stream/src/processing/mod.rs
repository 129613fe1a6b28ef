//! Live command processing.
//!
//! One command at a time moves through
//!
//! ```text
//! Idle ─► Dispatching ─► InTransaction ─► Writing ─► Committing ─► SideEffects ─► Idle
//!             │               │              │            │
//!             └───────────────┴──────────────┴────────────┴──► ErrorHandling ─► Writing
//! ```
//!
//! Follow-up records are written before the transaction commits, and the
//! processed position only advances after the commit. A crash between the
//! two leaves follow-up records whose source position is not marked
//! processed; replay applies them and processing resumes after them.
//!
//! A generic processing failure rolls the transaction back and replaces the
//! command's output with a rejection, an error event and (where an entity
//! can be identified) a blacklist entry, so the same failure cannot loop.

use std::convert::Infallible;
use std::time::Instant;

use sluice_log::{LogAppendEntry, LogStreamReader, LogStreamWriter, LogWriteError, LoggedRecord};
use sluice_state::{BlacklistState, KeyGenerator, LastProcessedPositionState};
use sluice_types::{
    ErrorRecord, Key, PROTOCOL_VERSION, Position, RecordKind, RecordValue, RejectionType, intent,
};

use crate::context::PartitionContext;
use crate::replay::LastProcessingPositions;
use crate::retry::{AbortableRetryStrategy, RecoverableRetryStrategy, RetryError};
use crate::{
    CommandResponseWriter, EventApplier, ProcessingContext, ProcessingError, ProcessingResponse,
    ProcessingResult, ProcessorId, RecordProcessorMap, StreamProcessorError, TypedRecord,
};


/// Where the processing state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingPhase {
    Idle,
    Dispatching,
    InTransaction,
    Writing,
    Committing,
    SideEffects,
    ErrorHandling,
}

/// How deep the machine is in handling a failure of the current command.
///
/// Every failed attempt at handling the error escalates one step; a
/// completed record resets to [`NoError`](Self::NoError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorHandlingPhase {
    NoError,
    /// Processing failed; the full rejection is being written.
    ProcessingFailed,
    /// Writing the rejection failed; falling back to a bare error event.
    ErrorHandlingFailed,
    /// Nothing worked; retrying the bare error event after every delay.
    EndlessErrorLoop,
}

impl ErrorHandlingPhase {
    fn escalate(self) -> Self {
        match self {
            Self::NoError => Self::ProcessingFailed,
            Self::ProcessingFailed => Self::ErrorHandlingFailed,
            Self::ErrorHandlingFailed | Self::EndlessErrorLoop => Self::EndlessErrorLoop,
        }
    }

    /// False once handling the error has itself failed.
    pub fn is_making_progress(self) -> bool {
        matches!(self, Self::NoError | Self::ProcessingFailed)
    }

    /// Gauge value exported with the metrics.
    pub fn code(self) -> u64 {
        match self {
            Self::NoError => 0,
            Self::ProcessingFailed => 1,
            Self::ErrorHandlingFailed => 2,
            Self::EndlessErrorLoop => 3,
        }
    }
}

/// Result of one [`ProcessingStateMachine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A command went through the full cycle.
    Processed,
    /// A record was read and passed over.
    Skipped,
    /// Nothing to read.
    Idle,
}

/// Reads commands, runs their processor and writes the outcome.
pub struct ProcessingStateMachine {
    context: PartitionContext,
    reader: Box<dyn LogStreamReader>,
    writer: Box<dyn LogStreamWriter>,
    event_applier: Box<dyn EventApplier>,
    response_writer: Box<dyn CommandResponseWriter>,
    key_generator: KeyGenerator,
    positions: LastProcessedPositionState,
    blacklist: BlacklistState,
    write_retry: AbortableRetryStrategy,
    side_effect_retry: AbortableRetryStrategy,
    update_state_retry: RecoverableRetryStrategy,

    result: ProcessingResult,
    record: Option<TypedRecord>,
    phase: ProcessingPhase,
    error_phase: ErrorHandlingPhase,

    last_read: Option<(Position, RecordKind)>,
    reached_end: bool,
    pending_written_position: Position,
    last_processed_position: Position,
    last_written_position: Position,
}

impl ProcessingStateMachine {
    pub fn new(
        context: PartitionContext,
        reader: Box<dyn LogStreamReader>,
        writer: Box<dyn LogStreamWriter>,
        event_applier: Box<dyn EventApplier>,
        response_writer: Box<dyn CommandResponseWriter>,
        start: LastProcessingPositions,
    ) -> Self {
        let db = context.db.clone();
        let update_state_retry = RecoverableRetryStrategy::new(context.recoverable_retry_delay);
        context
            .metrics
            .set_last_processed_position(start.last_processed_position);
        context
            .metrics
            .set_last_written_position(start.last_written_position);

        Self {
            key_generator: KeyGenerator::new(context.partition_id, db.clone()),
            positions: LastProcessedPositionState::new(db.clone()),
            blacklist: BlacklistState::new(db),
            context,
            reader,
            writer,
            event_applier,
            response_writer,
            write_retry: AbortableRetryStrategy,
            side_effect_retry: AbortableRetryStrategy,
            update_state_retry,
            result: ProcessingResult::new(),
            record: None,
            phase: ProcessingPhase::Idle,
            error_phase: ErrorHandlingPhase::NoError,
            last_read: None,
            reached_end: true,
            pending_written_position: Position::UNSET,
            last_processed_position: start.last_processed_position,
            last_written_position: start.last_written_position,
        }
    }

    pub fn phase(&self) -> ProcessingPhase {
        self.phase
    }

    pub fn error_phase(&self) -> ErrorHandlingPhase {
        self.error_phase
    }

    pub fn is_making_progress(&self) -> bool {
        self.error_phase.is_making_progress()
    }

    pub fn last_processed_position(&self) -> Position {
        self.last_processed_position
    }

    pub fn last_written_position(&self) -> Position {
        self.last_written_position
    }

    /// True when the last record read was not a command, nothing is left
    /// to read and nothing was written past it.
    ///
    /// Transient: a new command on the log flips it back.
    pub fn has_reached_end(&self) -> bool {
        self.reached_end
    }

    /// Reads and handles at most one record.
    pub async fn step(
        &mut self,
        processors: &mut RecordProcessorMap,
    ) -> Result<StepOutcome, StreamProcessorError> {
        if self.context.is_aborted() {
            return Err(StreamProcessorError::Aborted);
        }

        let has_next = self.reader.has_next();
        if let Some((position, kind)) = self.last_read {
            self.reached_end = kind != RecordKind::Command
                && !has_next
                && self.last_written_position <= position;
        }
        if !has_next {
            return Ok(StepOutcome::Idle);
        }
        let Some(logged) = self.reader.next() else {
            return Ok(StepOutcome::Idle);
        };

        self.check_position(logged.position)?;
        self.last_read = Some((logged.position, logged.kind()));

        if logged.kind() != RecordKind::Command {
            self.skip(&logged);
            return Ok(StepOutcome::Skipped);
        }

        let version = logged.metadata.protocol_version;
        if version > PROTOCOL_VERSION {
            tracing::error!(
                partition_id = %self.context.partition_id,
                position = %logged.position,
                %version,
                "command written with unsupported protocol version"
            );
            return Err(StreamProcessorError::UnsupportedProtocolVersion {
                position: logged.position,
                version,
                supported: PROTOCOL_VERSION,
            });
        }

        let Some(processor) =
            processors.lookup(RecordKind::Command, logged.value_type(), logged.intent())
        else {
            self.skip(&logged);
            return Ok(StepOutcome::Skipped);
        };

        self.process_command(&logged, processor, processors).await?;
        Ok(StepOutcome::Processed)
    }

    fn check_position(&self, position: Position) -> Result<(), StreamProcessorError> {
        match self.last_read {
            Some((previous, _)) if position <= previous => {
                tracing::error!(
                    partition_id = %self.context.partition_id,
                    %previous,
                    current = %position,
                    "log positions are not strictly increasing"
                );
                Err(StreamProcessorError::InconsistentLog {
                    previous,
                    current: position,
                })
            }
            _ => Ok(()),
        }
    }

    fn skip(&mut self, logged: &LoggedRecord) {
        tracing::trace!(
            position = %logged.position,
            kind = %logged.kind(),
            value_type = %logged.value_type(),
            "skipping record"
        );
        self.context.listener.on_skipped(logged);
        self.context.metrics.increment_skipped();
        self.reset_error_phase();
    }

    async fn process_command(
        &mut self,
        logged: &LoggedRecord,
        processor: ProcessorId,
        processors: &mut RecordProcessorMap,
    ) -> Result<(), StreamProcessorError> {
        let started = Instant::now();
        self.phase = ProcessingPhase::Dispatching;

        let value_type = logged.value_type();
        let mut failure = None;
        let value = match self.context.values.decode(value_type, &logged.value) {
            Ok(value) => value,
            Err(error) => {
                failure = Some(anyhow::Error::from(error));
                RecordValue::empty(value_type)
            }
        };
        TypedRecord::wrap_into(&mut self.record, logged, value);
        tracing::debug!(
            position = %logged.position,
            %value_type,
            intent = %logged.intent(),
            "processing command"
        );

        if failure.is_none() {
            failure = self.process_in_transaction(processor, processors).await?;
        }

        loop {
            if let Some(error) = failure.take() {
                self.handle_error(error).await?;
            }
            match self.write_records().await {
                Ok(()) => break,
                Err(RetryError::Aborted { .. }) => return Err(StreamProcessorError::Aborted),
                Err(RetryError::Failed(error)) => {
                    tracing::warn!(
                        position = %logged.position,
                        %error,
                        "writing follow-up records failed"
                    );
                    failure = Some(error.into());
                }
            }
        }

        self.commit().await?;

        self.last_processed_position = logged.position;
        self.context
            .metrics
            .set_last_processed_position(logged.position);
        if self.pending_written_position.is_set() {
            self.last_written_position = self.pending_written_position;
            self.context
                .metrics
                .set_last_written_position(self.pending_written_position);
        }
        self.reset_error_phase();

        self.execute_side_effects().await;

        if let Some(record) = self.record.as_ref() {
            self.context.listener.on_processed(record);
        }
        self.context.metrics.increment_processed();
        self.context
            .metrics
            .record_processing_latency(started.elapsed());
        self.phase = ProcessingPhase::Idle;
        Ok(())
    }

    /// Runs the processor until it succeeds, fails generically (returned as
    /// `Some`) or fails fatally.
    async fn process_in_transaction(
        &mut self,
        processor: ProcessorId,
        processors: &mut RecordProcessorMap,
    ) -> Result<Option<anyhow::Error>, StreamProcessorError> {
        loop {
            self.phase = ProcessingPhase::InTransaction;
            match self.run_processor(processor, processors) {
                Ok(()) => return Ok(None),
                Err(ProcessingError::Recoverable(reason)) => {
                    tracing::warn!(
                        position = %self.current_position(),
                        %reason,
                        delay = ?self.context.recoverable_retry_delay,
                        "recoverable processing failure, retrying command"
                    );
                    self.context.metrics.increment_retries();
                    self.rollback().await?;
                    self.context.wait_before_retry().await?;
                }
                Err(ProcessingError::Unrecoverable(reason)) => {
                    let position = self.current_position();
                    tracing::error!(%position, %reason, "unrecoverable processing failure");
                    self.rollback().await?;
                    return Err(StreamProcessorError::Unrecoverable { position, reason });
                }
                Err(ProcessingError::Failed(error)) => return Ok(Some(error)),
            }
        }
    }

    fn run_processor(
        &mut self,
        processor: ProcessorId,
        processors: &mut RecordProcessorMap,
    ) -> Result<(), ProcessingError> {
        let Self {
            context,
            event_applier,
            key_generator,
            positions,
            blacklist,
            result,
            record,
            ..
        } = self;
        let Some(record) = record.as_ref() else {
            return Ok(());
        };
        result.reset();

        let blacklisted = match record.value().process_instance_key() {
            Some(key) => blacklist.is_blacklisted(key)?,
            None => false,
        };
        if blacklisted {
            tracing::debug!(
                position = %record.position(),
                "entity is blacklisted, not processing command"
            );
        } else if let Some(processor) = processors.get_mut(processor) {
            let mut processing_context = ProcessingContext::new(
                context.partition_id,
                record.position(),
                result,
                key_generator,
                event_applier.as_mut(),
                context.db.as_ref(),
            );
            processor.process(record, &mut processing_context)?;
        }

        positions.mark_as_processed(record.position())?;
        Ok(())
    }

    /// Rolls back and replaces the command's output with its failure
    /// records, escalating the error phase on every failed attempt.
    async fn handle_error(&mut self, mut error: anyhow::Error) -> Result<(), StreamProcessorError> {
        loop {
            self.phase = ProcessingPhase::ErrorHandling;
            self.error_phase = self.error_phase.escalate();
            self.context.metrics.set_error_phase(self.error_phase.code());
            self.context.metrics.increment_error_handling();

            let position = self.current_position();
            match self.error_phase {
                ErrorHandlingPhase::EndlessErrorLoop => {
                    tracing::error!(
                        %position,
                        %error,
                        "error handling keeps failing, retrying after delay"
                    );
                    self.context.wait_before_retry().await?;
                }
                _ => tracing::warn!(%position, %error, "processing command failed, rejecting it"),
            }

            self.rollback().await?;
            match self.write_error_result(&error) {
                Ok(()) => return Ok(()),
                Err(next) => {
                    tracing::warn!(%position, error = %next, "failed to stage error records");
                    error = next.into();
                }
            }
        }
    }

    fn write_error_result(&mut self, error: &anyhow::Error) -> Result<(), ProcessingError> {
        let Some(record) = self.record.as_ref() else {
            return Ok(());
        };
        self.result.reset();

        let entity = record.value().process_instance_key();
        let full = self.error_phase == ErrorHandlingPhase::ProcessingFailed;
        let reason = if full {
            error.to_string()
        } else {
            format!(
                "expected to process command, but caught an error; see logs of partition {}",
                self.context.partition_id
            )
        };

        if full {
            let metadata = record
                .metadata()
                .clone()
                .with_rejection(RejectionType::ProcessingError, reason.clone());
            if let Some(request) = record.request() {
                self.result.set_response(ProcessingResponse {
                    partition_id: self.context.partition_id,
                    request,
                    key: record.key(),
                    metadata: metadata.clone(),
                    value: record.value().clone(),
                });
            }
            self.result.append_record(LogAppendEntry {
                key: record.key(),
                metadata,
                value: record.value().clone(),
            });
            if let Some(key) = entity {
                self.blacklist.blacklist(key)?;
            }
        }

        self.result.append_record(LogAppendEntry::event(
            record.key(),
            intent::error::CREATED,
            ErrorRecord {
                exception_message: reason,
                error_event_position: record.position(),
                process_instance_key: entity.unwrap_or(Key::UNSET),
            },
        ));
        self.positions.mark_as_processed(record.position())?;
        Ok(())
    }

    async fn write_records(&mut self) -> Result<(), RetryError<LogWriteError>> {
        self.phase = ProcessingPhase::Writing;
        self.pending_written_position = Position::UNSET;

        let records = self.result.records();
        if records.is_empty() {
            return Ok(());
        }
        let source_position = self.current_position();
        let writer = &mut self.writer;
        let mut written = Position::UNSET;
        self.write_retry
            .run_with_retry(
                || match writer.try_write(records, source_position) {
                    Ok(position) => {
                        written = position;
                        Ok(true)
                    }
                    Err(error) if error.is_transient() => Ok(false),
                    Err(error) => Err(error),
                },
                self.context.abort_condition(),
            )
            .await?;

        tracing::trace!(
            count = records.len(),
            %source_position,
            %written,
            "wrote follow-up records"
        );
        self.context.metrics.add_written(records.len());
        self.pending_written_position = written;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StreamProcessorError> {
        self.phase = ProcessingPhase::Committing;
        let db = &self.context.db;
        self.update_state_retry
            .run_with_retry(|| db.commit().map(|()| true), self.context.abort_condition())
            .await
            .map_err(into_stream_processor_error)
    }

    async fn rollback(&mut self) -> Result<(), StreamProcessorError> {
        let db = &self.context.db;
        self.update_state_retry
            .run_with_retry(|| db.rollback().map(|()| true), self.context.abort_condition())
            .await
            .map_err(into_stream_processor_error)
    }

    async fn execute_side_effects(&mut self) {
        self.phase = ProcessingPhase::SideEffects;
        let retry = self.side_effect_retry;
        let abort = self.context.abort_condition();
        let outcome: Result<(), RetryError<Infallible>> = match self.result.side_effect_mut() {
            Some(side_effect) => retry.run_with_retry(|| Ok(side_effect()), abort).await,
            None => match self.result.response() {
                Some(response) => {
                    let writer = &mut self.response_writer;
                    retry
                        .run_with_retry(|| Ok(writer.try_write_response(response)), abort)
                        .await
                }
                None => Ok(()),
            },
        };

        if let Err(error) = outcome {
            tracing::error!(
                position = %self.current_position(),
                %error,
                "side effect did not complete"
            );
            self.context.metrics.increment_side_effect_failures();
        }
    }

    fn reset_error_phase(&mut self) {
        if self.error_phase != ErrorHandlingPhase::NoError {
            self.error_phase = ErrorHandlingPhase::NoError;
            self.context.metrics.set_error_phase(self.error_phase.code());
        }
    }

    fn current_position(&self) -> Position {
        self.record
            .as_ref()
            .map_or(Position::UNSET, TypedRecord::position)
    }
}

fn into_stream_processor_error(error: RetryError<sluice_state::DbError>) -> StreamProcessorError {
    match error {
        RetryError::Aborted { .. } => StreamProcessorError::Aborted,
        RetryError::Failed(error) => StreamProcessorError::Db(error),
    }
}

impl std::fmt::Debug for ProcessingStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingStateMachine")
            .field("partition_id", &self.context.partition_id)
            .field("phase", &self.phase)
            .field("error_phase", &self.error_phase)
            .field("last_processed_position", &self.last_processed_position)
            .field("last_written_position", &self.last_written_position)
            .finish_non_exhaustive()
    }
}
