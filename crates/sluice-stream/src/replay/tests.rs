use std::sync::Arc;

use sluice_log::{LogAppendEntry, LogStream, LoggedRecord, MemoryLogStream};
use sluice_state::{
    BlacklistState, KeyGenerator, LastProcessedPositionState, MemoryDb, TransactionContext,
};
use sluice_types::{
    ErrorRecord, JobRecord, PartitionId, ProtocolVersion, RecordMetadata, RecordValues,
    RejectionType, Timestamp, ValueType, intent,
};

use super::*;
use crate::test_support::{
    ElementStateApplier, RecordingListener, activate, activated, append, append_from,
    context_with_listener, element, instance, partition,
};

struct Harness {
    log: MemoryLogStream,
    db: Arc<MemoryDb>,
    listener: Arc<RecordingListener>,
}

impl Harness {
    fn new() -> Self {
        Self::with_db(Arc::new(MemoryDb::new()))
    }

    fn with_db(db: Arc<MemoryDb>) -> Self {
        Self {
            log: MemoryLogStream::new(partition()),
            db,
            listener: Arc::new(RecordingListener::default()),
        }
    }

    fn machine(&self) -> ReplayStateMachine {
        let context = context_with_listener(self.db.clone(), self.listener.clone());
        let mut machine = ReplayStateMachine::new(
            context,
            self.log.new_reader(),
            Box::new(ElementStateApplier::new(self.db.clone())),
        );
        machine.start().expect("start replay");
        machine
    }

    fn mark_processed(&self, position: Position) {
        LastProcessedPositionState::new(self.db.clone())
            .mark_as_processed(position)
            .unwrap();
        self.db.commit().unwrap();
    }
}

async fn run_to_end(
    machine: &mut ReplayStateMachine,
) -> Result<Vec<ReplayStep>, StreamProcessorError> {
    let mut steps = Vec::new();
    loop {
        match machine.step().await? {
            ReplayStep::ReachedEnd => return Ok(steps),
            step => steps.push(step),
        }
    }
}

/// Two processed commands: instance 1 produced two events, instance 2 one.
fn processed_history(log: &MemoryLogStream) {
    append(log, &[activate(instance(1))]);
    append_from(
        log,
        Position::new(1),
        &[
            activated(instance(1)),
            LogAppendEntry::event(
                instance(10),
                intent::job::CREATED,
                JobRecord {
                    process_instance_key: instance(1),
                    ..Default::default()
                },
            ),
        ],
    );
    append(log, &[activate(instance(2))]);
    append_from(log, Position::new(4), &[activated(instance(2))]);
}

#[tokio::test]
async fn replays_events_and_resumes_after_last_source() {
    let harness = Harness::new();
    processed_history(&harness.log);
    let mut machine = harness.machine();

    let steps = run_to_end(&mut machine).await.unwrap();
    let positions = machine.complete().await.unwrap();

    assert_eq!(
        steps,
        vec![
            ReplayStep::Skipped,
            ReplayStep::Replayed,
            ReplayStep::Replayed,
            ReplayStep::Skipped,
            ReplayStep::Replayed,
        ]
    );
    assert_eq!(
        positions,
        LastProcessingPositions {
            last_processed_position: Position::new(4),
            last_written_position: Position::new(5),
        }
    );
    assert_eq!(ElementStateApplier::applied_count(harness.db.as_ref()), 3);
    assert_eq!(
        LastProcessedPositionState::new(harness.db.clone())
            .last_successful_processed_position()
            .unwrap(),
        Position::new(4)
    );
    assert!(!harness.db.has_pending_writes());
    assert_eq!(
        harness.listener.replayed(),
        vec![
            (Position::new(2), Position::new(1)),
            (Position::new(3), Position::new(1)),
            (Position::new(5), Position::new(4)),
        ]
    );

    let (mut reader, _applier) = machine.into_parts();
    assert_eq!(reader.next().map(|r| r.position), Some(Position::new(5)));
}

#[tokio::test]
async fn events_covered_by_snapshot_are_not_reapplied() {
    let harness = Harness::new();
    processed_history(&harness.log);
    harness.mark_processed(Position::new(1));
    let mut machine = harness.machine();

    let steps = run_to_end(&mut machine).await.unwrap();
    let positions = machine.complete().await.unwrap();

    assert_eq!(machine.snapshot_position(), Position::new(1));
    assert_eq!(
        steps,
        vec![
            ReplayStep::Skipped,
            ReplayStep::Skipped,
            ReplayStep::Skipped,
            ReplayStep::Replayed,
        ]
    );
    assert_eq!(ElementStateApplier::applied_count(harness.db.as_ref()), 1);
    assert_eq!(positions.last_processed_position, Position::new(4));
}

#[tokio::test]
async fn empty_log_completes_at_snapshot_position() {
    let harness = Harness::new();
    let mut machine = harness.machine();
    assert!(run_to_end(&mut machine).await.unwrap().is_empty());
    assert_eq!(
        machine.complete().await.unwrap(),
        LastProcessingPositions::default()
    );

    let harness = Harness::new();
    harness.mark_processed(Position::new(7));
    let mut machine = harness.machine();
    run_to_end(&mut machine).await.unwrap();
    assert_eq!(
        machine.complete().await.unwrap(),
        LastProcessingPositions {
            last_processed_position: Position::new(7),
            last_written_position: Position::new(7),
        }
    );
}

#[tokio::test]
async fn second_replay_changes_nothing() {
    let harness = Harness::new();
    processed_history(&harness.log);
    let mut first = harness.machine();
    run_to_end(&mut first).await.unwrap();
    first.complete().await.unwrap();
    let after_first = harness.db.snapshot().unwrap();

    let mut second = harness.machine();
    let steps = run_to_end(&mut second).await.unwrap();
    second.complete().await.unwrap();

    assert!(steps.iter().all(|step| *step == ReplayStep::Skipped));
    assert_eq!(harness.db.snapshot().unwrap(), after_first);
}

#[tokio::test]
async fn key_generator_restored_to_highest_key_of_partition() {
    let harness = Harness::new();
    let foreign = Key::from_partition_and_local(PartitionId::new(2), 1_000);
    append(&harness.log, &[activate(instance(1))]);
    append_from(
        &harness.log,
        Position::new(1),
        &[
            activated(instance(3)),
            activated(instance(17)),
            activated(instance(42)),
            activated(foreign),
        ],
    );
    let mut machine = harness.machine();

    run_to_end(&mut machine).await.unwrap();
    machine.complete().await.unwrap();

    let generator = KeyGenerator::new(partition(), harness.db.clone());
    let next = generator.next_key().unwrap();
    assert!(next > instance(42));
    assert_eq!(next.partition_id(), Some(partition()));
}

#[tokio::test]
async fn error_events_restore_blacklist() {
    let harness = Harness::new();
    append(&harness.log, &[activate(instance(1)), activate(instance(2))]);
    append_from(
        &harness.log,
        Position::new(1),
        &[
            LogAppendEntry::rejection(
                instance(1),
                intent::process_instance::ACTIVATE_ELEMENT,
                element(instance(1)),
                RejectionType::ProcessingError,
                "boom",
            ),
            LogAppendEntry::event(
                instance(1),
                intent::error::CREATED,
                ErrorRecord {
                    exception_message: "boom".into(),
                    error_event_position: Position::new(1),
                    process_instance_key: instance(1),
                },
            ),
        ],
    );
    append_from(
        &harness.log,
        Position::new(2),
        &[activated(instance(1)), activated(instance(2))],
    );
    let mut machine = harness.machine();

    run_to_end(&mut machine).await.unwrap();
    let positions = machine.complete().await.unwrap();

    let blacklist = BlacklistState::new(harness.db.clone());
    assert_eq!(blacklist.blacklisted_keys().unwrap(), vec![instance(1)]);
    assert_eq!(ElementStateApplier::state_of(harness.db.as_ref(), instance(1)), None);
    assert_eq!(
        ElementStateApplier::state_of(harness.db.as_ref(), instance(2)),
        Some(intent::process_instance::ELEMENT_ACTIVATED)
    );
    assert_eq!(positions.last_processed_position, Position::new(2));
}

#[tokio::test]
async fn decreasing_position_is_an_inconsistent_log() {
    let harness = Harness::new();
    let value = RecordValue::from(element(instance(1)));
    for position in [4, 4] {
        harness.log.append_raw(LoggedRecord {
            position: Position::new(position),
            source_position: Position::new(1),
            key: instance(1),
            timestamp: Timestamp::from_millis(0),
            metadata: RecordMetadata::event(
                ValueType::ProcessInstance,
                intent::process_instance::ELEMENT_ACTIVATED,
            ),
            value: RecordValues::encode(&value).unwrap(),
        });
    }
    let mut machine = harness.machine();

    let error = run_to_end(&mut machine).await.unwrap_err();

    assert!(matches!(
        error,
        StreamProcessorError::InconsistentLog { previous, current }
            if previous == Position::new(4) && current == Position::new(4)
    ));
}

#[tokio::test]
async fn newer_protocol_version_is_fatal() {
    let harness = Harness::new();
    let mut event = activated(instance(1));
    event.metadata = event
        .metadata
        .with_protocol_version(ProtocolVersion::new(PROTOCOL_VERSION.as_u16() + 1));
    append_from(&harness.log, Position::new(1), &[event]);
    let mut machine = harness.machine();

    let error = run_to_end(&mut machine).await.unwrap_err();

    assert!(matches!(
        error,
        StreamProcessorError::UnsupportedProtocolVersion { position, .. }
            if position == Position::new(1)
    ));
    assert_eq!(ElementStateApplier::applied_count(harness.db.as_ref()), 0);
}

#[tokio::test]
async fn unwritten_commit_resumes_after_command() {
    // events of command 1 reached the log, its transaction never committed
    let harness = Harness::new();
    append(&harness.log, &[activate(instance(1))]);
    append_from(&harness.log, Position::new(1), &[activated(instance(1))]);
    let mut machine = harness.machine();

    run_to_end(&mut machine).await.unwrap();
    let positions = machine.complete().await.unwrap();

    assert_eq!(positions.last_processed_position, Position::new(1));
    let (mut reader, _applier) = machine.into_parts();
    let next = reader.next().expect("event after the command");
    assert_eq!(next.position, Position::new(2));
    assert_eq!(next.kind(), RecordKind::Event);
}

#[tokio::test]
async fn replay_keeps_up_with_new_events() {
    let harness = Harness::new();
    append(&harness.log, &[activate(instance(1))]);
    let mut machine = harness.machine();
    assert_eq!(machine.step().await.unwrap(), ReplayStep::Skipped);
    assert_eq!(machine.step().await.unwrap(), ReplayStep::ReachedEnd);

    append_from(&harness.log, Position::new(1), &[activated(instance(1))]);

    assert_eq!(machine.step().await.unwrap(), ReplayStep::Replayed);
    assert_eq!(machine.last_source_position(), Position::new(1));
    assert_eq!(machine.last_read_position(), Position::new(2));
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn replay(harness: &Harness) {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(async {
                let mut machine = harness.machine();
                run_to_end(&mut machine).await.unwrap();
                machine.complete().await.unwrap();
            });
    }

    proptest! {
        #[test]
        fn replay_from_same_snapshot_is_deterministic(
            events_per_command in proptest::collection::vec(0usize..4, 1..12),
            snapshot_after in 0usize..12,
        ) {
            let log = MemoryLogStream::new(partition());
            let mut command_positions = Vec::new();
            for (index, events) in events_per_command.iter().enumerate() {
                let key = instance(index as i64 + 1);
                let command = append(&log, &[activate(key)]);
                command_positions.push(command);
                let follow_ups: Vec<_> = (0..*events).map(|_| activated(key)).collect();
                if !follow_ups.is_empty() {
                    append_from(&log, command, &follow_ups);
                }
            }

            let base = Harness::new();
            if let Some(position) = command_positions.get(snapshot_after) {
                base.mark_processed(*position);
            }
            let snapshot = base.db.snapshot().unwrap();

            let mut results = Vec::new();
            for _ in 0..2 {
                let mut harness = Harness::with_db(Arc::new(MemoryDb::from_snapshot(&snapshot)));
                harness.log = log.clone();
                replay(&harness);
                replay(&harness);
                results.push(harness.db.snapshot().unwrap());
            }

            prop_assert_eq!(&results[0], &results[1]);
            let expected: usize = events_per_command
                .iter()
                .zip(&command_positions)
                .filter(|(_, position)| {
                    command_positions
                        .get(snapshot_after)
                        .is_none_or(|snapshot| *position > snapshot)
                })
                .map(|(events, _)| *events)
                .sum();
            let db = MemoryDb::from_snapshot(&results[0]);
            prop_assert_eq!(ElementStateApplier::applied_count(&db), expected as u64);
        }
    }
}
