//! Rebuilding state from the log.
//!
//! Replay reads forward from the last processed position stored in the
//! state (the snapshot position) and applies every event whose source
//! command lies beyond it. Nothing is written to the log. Applying an
//! event, marking its source position processed and committing form one
//! unit that is retried until it succeeds.
//!
//! On a leader, replay completes once it reaches the end of the log and
//! hands its reader over to processing, positioned right after the last
//! command whose events were replayed. A follower keeps replaying.

use sluice_log::{LogStreamReader, LoggedRecord};
use sluice_state::{BlacklistState, KeyGenerator, LastProcessedPositionState};
use sluice_types::{Key, PROTOCOL_VERSION, Position, RecordKind, RecordValue};

use crate::context::PartitionContext;
use crate::retry::{EndlessRetryStrategy, RetryError};
use crate::{EventApplier, ProcessingError, StreamProcessorError, TypedRecord};

#[cfg(test)]
mod tests;

/// Where processing resumes after replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastProcessingPositions {
    /// Last command whose outcome is reflected in state.
    pub last_processed_position: Position,
    /// Last record found on the log.
    pub last_written_position: Position,
}

impl Default for LastProcessingPositions {
    fn default() -> Self {
        Self {
            last_processed_position: Position::UNSET,
            last_written_position: Position::UNSET,
        }
    }
}

/// Result of one [`ReplayStateMachine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStep {
    /// An event was applied to state.
    Replayed,
    /// A record was read without changing state.
    Skipped,
    /// Nothing left to read for now.
    ReachedEnd,
}

pub struct ReplayStateMachine {
    context: PartitionContext,
    reader: Box<dyn LogStreamReader>,
    event_applier: Box<dyn EventApplier>,
    key_generator: KeyGenerator,
    positions: LastProcessedPositionState,
    blacklist: BlacklistState,
    retry: EndlessRetryStrategy,
    record: Option<TypedRecord>,

    snapshot_position: Position,
    last_read_position: Position,
    last_source_position: Position,
    highest_key: Key,
}

impl ReplayStateMachine {
    pub fn new(
        context: PartitionContext,
        reader: Box<dyn LogStreamReader>,
        event_applier: Box<dyn EventApplier>,
    ) -> Self {
        let db = context.db.clone();
        Self {
            key_generator: KeyGenerator::new(context.partition_id, db.clone()),
            positions: LastProcessedPositionState::new(db.clone()),
            blacklist: BlacklistState::new(db),
            context,
            reader,
            event_applier,
            retry: EndlessRetryStrategy,
            record: None,
            snapshot_position: Position::UNSET,
            last_read_position: Position::UNSET,
            last_source_position: Position::UNSET,
            highest_key: Key::UNSET,
        }
    }

    /// Positions the reader after the snapshot position found in state.
    pub fn start(&mut self) -> Result<(), StreamProcessorError> {
        self.snapshot_position = self.positions.last_successful_processed_position()?;
        self.last_source_position = self.snapshot_position;
        let has_records = self
            .reader
            .seek_to_next_record_after(self.snapshot_position);

        tracing::info!(
            partition_id = %self.context.partition_id,
            snapshot_position = %self.snapshot_position,
            has_records,
            "starting replay"
        );
        Ok(())
    }

    pub fn snapshot_position(&self) -> Position {
        self.snapshot_position
    }

    pub fn last_read_position(&self) -> Position {
        self.last_read_position
    }

    /// Latest source position of a replayed event, or the snapshot
    /// position if there was none.
    pub fn last_source_position(&self) -> Position {
        self.last_source_position
    }

    /// Reads and replays at most one record.
    pub async fn step(&mut self) -> Result<ReplayStep, StreamProcessorError> {
        if self.context.is_aborted() {
            return Err(StreamProcessorError::Aborted);
        }
        if !self.reader.has_next() {
            return Ok(ReplayStep::ReachedEnd);
        }
        let Some(logged) = self.reader.next() else {
            return Ok(ReplayStep::ReachedEnd);
        };

        if self.last_read_position.is_set() && logged.position <= self.last_read_position {
            tracing::error!(
                partition_id = %self.context.partition_id,
                previous = %self.last_read_position,
                current = %logged.position,
                "log positions are not strictly increasing"
            );
            return Err(StreamProcessorError::InconsistentLog {
                previous: self.last_read_position,
                current: logged.position,
            });
        }
        self.last_read_position = logged.position;

        if logged.kind() != RecordKind::Event {
            return Ok(ReplayStep::Skipped);
        }
        let version = logged.metadata.protocol_version;
        if version > PROTOCOL_VERSION {
            tracing::error!(
                partition_id = %self.context.partition_id,
                position = %logged.position,
                %version,
                "event written with unsupported protocol version"
            );
            return Err(StreamProcessorError::UnsupportedProtocolVersion {
                position: logged.position,
                version,
                supported: PROTOCOL_VERSION,
            });
        }

        if logged.key.partition_id() == Some(self.context.partition_id)
            && logged.key > self.highest_key
        {
            self.highest_key = logged.key;
        }
        if logged.source_position <= self.snapshot_position {
            return Ok(ReplayStep::Skipped);
        }

        self.replay_event(&logged).await?;

        self.last_source_position = self.last_source_position.max(logged.source_position);
        self.context
            .listener
            .on_replayed(logged.position, logged.source_position);
        self.context.metrics.increment_replayed();
        Ok(ReplayStep::Replayed)
    }

    async fn replay_event(&mut self, logged: &LoggedRecord) -> Result<(), StreamProcessorError> {
        let value = self
            .context
            .values
            .decode(logged.value_type(), &logged.value)
            .map_err(|source| StreamProcessorError::Decode {
                position: logged.position,
                source,
            })?;
        let record = TypedRecord::wrap_into(&mut self.record, logged, value);
        tracing::trace!(
            position = %logged.position,
            source_position = %logged.source_position,
            value_type = %logged.value_type(),
            "replaying event"
        );

        let db = &self.context.db;
        let event_applier = &mut self.event_applier;
        let blacklist = &self.blacklist;
        let positions = &self.positions;
        self.retry
            .run_with_retry(
                || {
                    let applied = apply_event(record, event_applier.as_mut(), blacklist)
                        .and_then(|()| {
                            positions
                                .mark_as_processed(record.source_position())
                                .map_err(ProcessingError::from)
                        })
                        .and_then(|()| db.commit().map_err(ProcessingError::from));
                    if applied.is_err() {
                        if let Err(error) = db.rollback() {
                            tracing::warn!(%error, "rollback after failed replay failed");
                        }
                    }
                    applied.map(|()| true)
                },
                self.context.abort_condition(),
            )
            .await
            .map_err(|error| match error {
                RetryError::Aborted { .. } => StreamProcessorError::Aborted,
                RetryError::Failed(error) => StreamProcessorError::Unrecoverable {
                    position: logged.position,
                    reason: error.to_string(),
                },
            })
    }

    /// Restores the key generator and positions the reader for processing.
    pub async fn complete(&mut self) -> Result<LastProcessingPositions, StreamProcessorError> {
        if self.highest_key.is_set() {
            let key_generator = &self.key_generator;
            let db = &self.context.db;
            let highest_key = self.highest_key;
            self.retry
                .run_with_retry(
                    || {
                        let restored = key_generator
                            .set_key_if_higher(highest_key)
                            .and_then(|()| db.commit());
                        if restored.is_err() {
                            if let Err(error) = db.rollback() {
                                tracing::warn!(%error, "rollback after failed key restore failed");
                            }
                        }
                        restored.map(|()| true)
                    },
                    self.context.abort_condition(),
                )
                .await
                .map_err(|error| match error {
                    RetryError::Aborted { .. } => StreamProcessorError::Aborted,
                    RetryError::Failed(error) => StreamProcessorError::Db(error),
                })?;
        }

        self.reader
            .seek_to_next_record_after(self.last_source_position);
        let positions = LastProcessingPositions {
            last_processed_position: self.last_source_position,
            last_written_position: self.last_read_position.max(self.last_source_position),
        };

        tracing::info!(
            partition_id = %self.context.partition_id,
            last_processed_position = %positions.last_processed_position,
            last_written_position = %positions.last_written_position,
            highest_key = %self.highest_key,
            "replay completed"
        );
        Ok(positions)
    }

    /// Hands the reader and the event applier over to processing.
    pub fn into_parts(self) -> (Box<dyn LogStreamReader>, Box<dyn EventApplier>) {
        (self.reader, self.event_applier)
    }
}

fn apply_event(
    record: &TypedRecord,
    event_applier: &mut dyn EventApplier,
    blacklist: &BlacklistState,
) -> Result<(), ProcessingError> {
    if let RecordValue::Error(error) = record.value() {
        if error.process_instance_key.is_set() {
            blacklist.blacklist(error.process_instance_key)?;
        }
        return Ok(());
    }

    if let Some(key) = record.value().process_instance_key() {
        if blacklist.is_blacklisted(key)? {
            tracing::debug!(
                position = %record.position(),
                "entity is blacklisted, not replaying event"
            );
            return Ok(());
        }
    }
    event_applier.apply_state(record.key(), record.intent(), record.value())
}

impl std::fmt::Debug for ReplayStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayStateMachine")
            .field("partition_id", &self.context.partition_id)
            .field("snapshot_position", &self.snapshot_position)
            .field("last_read_position", &self.last_read_position)
            .field("last_source_position", &self.last_source_position)
            .field("highest_key", &self.highest_key)
            .finish_non_exhaustive()
    }
}
