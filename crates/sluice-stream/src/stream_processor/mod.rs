//! The per-partition orchestrator.
//!
//! A [`StreamProcessor`] owns one tokio task that first replays the log
//! and then, on a leader, processes commands. Everything that touches the
//! state store runs on that task. The [`StreamProcessorHandle`] talks to it
//! through a bounded control inbox and reads its published status.
//!
//! ```text
//! Initial ─► Replay ◄─► Paused
//!              │
//!              ▼
//!        ReplayCompleted ─► Processing ◄─► Paused
//!
//! any phase ─┬─► Closing ─► Closed
//!            └─► Failed
//! ```
//!
//! A pause during replay stops applying events; resuming returns to
//! `Replay`. Lifecycle listeners only see `on_paused` once recovered.
//!
//! Closing sets the shared abort flag before joining the task, so retry
//! loops that never succeed still give up.

mod health;

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use sluice_log::LogStream;
use sluice_state::TransactionContext;
use sluice_types::{Intent, PartitionId, Position, RecordKind, RecordValues, ValueType};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

pub use health::{HealthReport, HealthStatus};

use self::health::SharedStatus;
use crate::context::PartitionContext;
use crate::lifecycle::{ReadonlyContext, StreamProcessorLifecycleAware};
use crate::processing::{ProcessingStateMachine, StepOutcome};
use crate::replay::{ReplayStateMachine, ReplayStep};
use crate::settings::{StreamProcessorMode, StreamProcessorSettings};
use crate::{
    CommandResponseWriter, EventApplier, MetricsSnapshot, NoopEventApplier, NoopListener,
    NoopResponseWriter, ProcessingMetrics, RecordProcessor, RecordProcessorMap,
    RegistrationError, StreamProcessorError, StreamProcessorListener,
};

/// Lifecycle phase of a partition's stream processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProcessorPhase {
    Initial,
    Replay,
    ReplayCompleted,
    Processing,
    Paused,
    Closing,
    Closed,
    Failed,
}

impl StreamProcessorPhase {
    fn code(self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Replay => 1,
            Self::ReplayCompleted => 2,
            Self::Processing => 3,
            Self::Paused => 4,
            Self::Closing => 5,
            Self::Closed => 6,
            Self::Failed => 7,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Initial,
            1 => Self::Replay,
            2 => Self::ReplayCompleted,
            3 => Self::Processing,
            4 => Self::Paused,
            5 => Self::Closing,
            6 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

impl Display for StreamProcessorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::Replay => "replay",
            Self::ReplayCompleted => "replay-completed",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

enum Control {
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Close,
}

/// Collects everything a partition's stream processor needs.
pub struct StreamProcessorBuilder {
    log: Arc<dyn LogStream>,
    db: Arc<dyn TransactionContext>,
    processors: RecordProcessorMap,
    registration_error: Option<RegistrationError>,
    event_applier: Box<dyn EventApplier>,
    lifecycle_listeners: Vec<Box<dyn StreamProcessorLifecycleAware>>,
    listener: Arc<dyn StreamProcessorListener>,
    response_writer: Box<dyn CommandResponseWriter>,
    values: Arc<RecordValues>,
    settings: StreamProcessorSettings,
}

impl StreamProcessorBuilder {
    /// Replaces the processors registered so far.
    pub fn processors(mut self, processors: RecordProcessorMap) -> Self {
        self.processors = processors;
        self
    }

    /// Registers `processor` for one record kind, value type and intent.
    ///
    /// The first failing registration is reported by [`build`](Self::build).
    pub fn register(
        mut self,
        kind: RecordKind,
        value_type: ValueType,
        intent: Intent,
        processor: impl RecordProcessor + 'static,
    ) -> Self {
        if self.registration_error.is_none() {
            if let Err(error) = self
                .processors
                .register_processor(kind, value_type, intent, processor)
            {
                self.registration_error = Some(error);
            }
        }
        self
    }

    /// Shorthand for registering a command processor.
    pub fn command_processor(
        self,
        value_type: ValueType,
        intent: Intent,
        processor: impl RecordProcessor + 'static,
    ) -> Self {
        self.register(RecordKind::Command, value_type, intent, processor)
    }

    pub fn event_applier(mut self, event_applier: impl EventApplier + 'static) -> Self {
        self.event_applier = Box::new(event_applier);
        self
    }

    /// Adds a lifecycle listener on top of the registered processors.
    pub fn lifecycle_listener(
        mut self,
        listener: impl StreamProcessorLifecycleAware + 'static,
    ) -> Self {
        self.lifecycle_listeners.push(Box::new(listener));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StreamProcessorListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn response_writer(mut self, writer: impl CommandResponseWriter + 'static) -> Self {
        self.response_writer = Box::new(writer);
        self
    }

    pub fn values(mut self, values: Arc<RecordValues>) -> Self {
        self.values = values;
        self
    }

    pub fn settings(mut self, settings: StreamProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn mode(mut self, mode: StreamProcessorMode) -> Self {
        self.settings.mode = mode;
        self
    }

    pub fn build(self) -> Result<StreamProcessor, StreamProcessorError> {
        if let Some(error) = self.registration_error {
            return Err(error.into());
        }
        let partition_id = self.log.partition_id();
        if let Some(configured) = self.settings.partition_id
            && configured != partition_id
        {
            return Err(StreamProcessorError::PartitionMismatch {
                configured,
                log: partition_id,
            });
        }
        let context = PartitionContext {
            partition_id,
            db: self.db,
            values: self.values,
            listener: self.listener,
            metrics: Arc::new(ProcessingMetrics::new(partition_id)),
            abort: Arc::default(),
            recoverable_retry_delay: self.settings.recoverable_retry_delay,
        };

        Ok(StreamProcessor {
            context,
            log: self.log,
            processors: self.processors,
            event_applier: self.event_applier,
            lifecycle_listeners: self.lifecycle_listeners,
            response_writer: self.response_writer,
            settings: self.settings,
        })
    }
}

/// A configured, not yet started stream processor for one partition.
pub struct StreamProcessor {
    context: PartitionContext,
    log: Arc<dyn LogStream>,
    processors: RecordProcessorMap,
    event_applier: Box<dyn EventApplier>,
    lifecycle_listeners: Vec<Box<dyn StreamProcessorLifecycleAware>>,
    response_writer: Box<dyn CommandResponseWriter>,
    settings: StreamProcessorSettings,
}

impl StreamProcessor {
    pub fn builder(
        log: Arc<dyn LogStream>,
        db: Arc<dyn TransactionContext>,
    ) -> StreamProcessorBuilder {
        StreamProcessorBuilder {
            log,
            db,
            processors: RecordProcessorMap::new(),
            registration_error: None,
            event_applier: Box::new(NoopEventApplier),
            lifecycle_listeners: Vec::new(),
            listener: Arc::new(NoopListener),
            response_writer: Box::new(NoopResponseWriter),
            values: Arc::new(RecordValues::new()),
            settings: StreamProcessorSettings::default(),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.context.partition_id
    }

    /// Spawns the partition's task on the current tokio runtime.
    pub fn start(self) -> StreamProcessorHandle {
        let (control, inbox) = mpsc::channel(self.settings.control_queue_capacity);
        let status = Arc::new(SharedStatus::new());
        status.tick();

        let mut handle = StreamProcessorHandle {
            partition_id: self.context.partition_id,
            control,
            abort: self.context.abort.clone(),
            status: status.clone(),
            metrics: self.context.metrics.clone(),
            tick_interval: self.settings.health_tick_interval,
            task: None,
        };
        let runner = Runner {
            notify: self.log.record_available(),
            context: self.context,
            log: self.log,
            processors: self.processors,
            lifecycle_listeners: self.lifecycle_listeners,
            response_writer: Some(self.response_writer),
            settings: self.settings,
            status,
            inbox,
            recovered: false,
            paused: false,
            paused_delivered: false,
        };
        handle.task = Some(tokio::spawn(runner.run(self.event_applier)));
        handle
    }
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("partition_id", &self.context.partition_id)
            .field("processors", &self.processors)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Controls a running stream processor.
///
/// Dropping the handle aborts the task without waiting for it.
pub struct StreamProcessorHandle {
    partition_id: PartitionId,
    control: mpsc::Sender<Control>,
    abort: Arc<std::sync::atomic::AtomicBool>,
    status: Arc<SharedStatus>,
    metrics: Arc<ProcessingMetrics>,
    tick_interval: Duration,
    task: Option<JoinHandle<Result<(), StreamProcessorError>>>,
}

impl StreamProcessorHandle {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn phase(&self) -> StreamProcessorPhase {
        self.status.phase()
    }

    pub fn is_making_progress(&self) -> bool {
        self.status.is_making_progress()
    }

    pub fn last_processed_position(&self) -> Position {
        self.status.last_processed_position()
    }

    pub fn last_written_position(&self) -> Position {
        self.status.last_written_position()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn export_metrics(&self) -> String {
        self.metrics.export_prometheus()
    }

    pub fn health(&self) -> HealthReport {
        let finished = self.task.as_ref().is_none_or(JoinHandle::is_finished);
        self.status.report(self.tick_interval, finished)
    }

    /// Stops processing, or replay, after the current record.
    ///
    /// Returns once the pause took effect.
    pub async fn pause(&self) -> Result<(), StreamProcessorError> {
        self.request(Control::Pause).await
    }

    /// Resumes processing. Ignored unless the processor was paused.
    pub async fn resume(&self) -> Result<(), StreamProcessorError> {
        self.request(Control::Resume).await
    }

    async fn request(
        &self,
        control: fn(oneshot::Sender<()>) -> Control,
    ) -> Result<(), StreamProcessorError> {
        let (ack, acked) = oneshot::channel();
        self.control
            .send(control(ack))
            .await
            .map_err(|_| StreamProcessorError::TaskFailed("stream processor task is gone".into()))?;
        acked
            .await
            .map_err(|_| StreamProcessorError::TaskFailed("stream processor task is gone".into()))
    }

    /// Aborts in-flight work and waits for the task to finish.
    ///
    /// Returns the error that failed the partition, if any.
    pub async fn close(mut self) -> Result<(), StreamProcessorError> {
        self.abort.store(true, Ordering::Release);
        // A full inbox already wakes the task.
        let _ = self.control.try_send(Control::Close);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|error| StreamProcessorError::TaskFailed(error.to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for StreamProcessorHandle {
    fn drop(&mut self) {
        self.abort.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for StreamProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessorHandle")
            .field("partition_id", &self.partition_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

enum Stage {
    Replay(ReplayStateMachine),
    Processing(ProcessingStateMachine),
}

/// State of the partition's task.
struct Runner {
    context: PartitionContext,
    log: Arc<dyn LogStream>,
    notify: Arc<Notify>,
    processors: RecordProcessorMap,
    lifecycle_listeners: Vec<Box<dyn StreamProcessorLifecycleAware>>,
    response_writer: Option<Box<dyn CommandResponseWriter>>,
    settings: StreamProcessorSettings,
    status: Arc<SharedStatus>,
    inbox: mpsc::Receiver<Control>,
    recovered: bool,
    paused: bool,
    paused_delivered: bool,
}

impl Runner {
    async fn run(
        mut self,
        event_applier: Box<dyn EventApplier>,
    ) -> Result<(), StreamProcessorError> {
        let partition_id = self.context.partition_id;
        match self.run_until_closed(event_applier).await {
            Ok(()) => {
                self.close();
                Ok(())
            }
            Err(error) if error.is_abort() => {
                self.close();
                Ok(())
            }
            Err(error) => {
                tracing::error!(%partition_id, %error, "stream processor failed");
                self.status.set_phase(StreamProcessorPhase::Failed);
                self.broadcast(|listener| listener.on_failed());
                Err(error)
            }
        }
    }

    fn close(&mut self) {
        self.set_phase(StreamProcessorPhase::Closing);
        self.broadcast(|listener| listener.on_close());
        self.set_phase(StreamProcessorPhase::Closed);
    }

    async fn run_until_closed(
        &mut self,
        event_applier: Box<dyn EventApplier>,
    ) -> Result<(), StreamProcessorError> {
        self.set_phase(StreamProcessorPhase::Replay);
        let mut replay =
            ReplayStateMachine::new(self.context.clone(), self.log.new_reader(), event_applier);
        replay.start()?;
        let mut stage = Stage::Replay(replay);

        let mut tick = tokio::time::interval(self.settings.health_tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.context.is_aborted() {
                return Err(StreamProcessorError::Aborted);
            }
            while let Ok(control) = self.inbox.try_recv() {
                self.handle_control(control);
            }

            let mut replay_done = false;
            let idle = match &mut stage {
                Stage::Replay(_) if self.paused => true,
                Stage::Replay(replay) => match replay.step().await? {
                    ReplayStep::ReachedEnd
                        if self.settings.mode == StreamProcessorMode::Processing =>
                    {
                        replay_done = true;
                        false
                    }
                    ReplayStep::ReachedEnd => true,
                    ReplayStep::Replayed | ReplayStep::Skipped => false,
                },
                Stage::Processing(processing) => self.step_processing(processing).await?,
            };
            if replay_done {
                stage = match stage {
                    Stage::Replay(replay) => Stage::Processing(self.complete_replay(replay).await?),
                    processing => processing,
                };
            }
            self.status.tick();

            if idle {
                self.wait(&mut tick).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Returns true if there was nothing to do.
    async fn step_processing(
        &mut self,
        processing: &mut ProcessingStateMachine,
    ) -> Result<bool, StreamProcessorError> {
        if self.paused {
            return Ok(true);
        }
        let outcome = processing.step(&mut self.processors).await?;
        self.status
            .set_making_progress(processing.is_making_progress());
        self.status.set_positions(
            processing.last_processed_position(),
            processing.last_written_position(),
        );
        Ok(outcome == StepOutcome::Idle)
    }

    async fn complete_replay(
        &mut self,
        mut replay: ReplayStateMachine,
    ) -> Result<ProcessingStateMachine, StreamProcessorError> {
        let positions = replay.complete().await?;
        self.set_phase(StreamProcessorPhase::ReplayCompleted);
        self.status.set_positions(
            positions.last_processed_position,
            positions.last_written_position,
        );

        let (reader, event_applier) = replay.into_parts();
        let response_writer = self
            .response_writer
            .take()
            .unwrap_or_else(|| Box::new(NoopResponseWriter));
        let processing = ProcessingStateMachine::new(
            self.context.clone(),
            reader,
            self.log.new_writer(),
            event_applier,
            response_writer,
            positions,
        );

        let readonly = ReadonlyContext {
            partition_id: self.context.partition_id,
            last_processed_position: positions.last_processed_position,
            last_written_position: positions.last_written_position,
        };
        self.broadcast_recovered(&readonly)?;
        self.recovered = true;

        self.set_phase(StreamProcessorPhase::Processing);
        Ok(processing)
    }

    async fn wait(&mut self, tick: &mut Interval) {
        let control = tokio::select! {
            control = self.inbox.recv() => Some(control),
            () = self.notify.notified() => None,
            _ = tick.tick() => None,
        };
        match control {
            Some(Some(control)) => self.handle_control(control),
            // Every handle is gone.
            Some(None) => self.context.abort.store(true, Ordering::Release),
            None => {}
        }
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Pause(ack) => {
                if !self.paused {
                    self.paused = true;
                    if self.recovered {
                        self.deliver_paused();
                    } else {
                        // Replay halts; listeners only hear about pauses after recovery.
                        self.set_phase(StreamProcessorPhase::Paused);
                        tracing::info!(partition_id = %self.context.partition_id, "replay paused");
                    }
                }
                let _ = ack.send(());
            }
            Control::Resume(ack) => {
                if self.paused {
                    self.paused = false;
                    if self.paused_delivered {
                        self.paused_delivered = false;
                        self.broadcast(|listener| listener.on_resumed());
                        self.set_phase(StreamProcessorPhase::Processing);
                        tracing::info!(
                            partition_id = %self.context.partition_id,
                            "processing resumed"
                        );
                    } else if !self.recovered {
                        self.set_phase(StreamProcessorPhase::Replay);
                        tracing::info!(partition_id = %self.context.partition_id, "replay resumed");
                    }
                }
                let _ = ack.send(());
            }
            Control::Close => {}
        }
    }

    fn deliver_paused(&mut self) {
        self.paused_delivered = true;
        self.broadcast(|listener| listener.on_paused());
        self.set_phase(StreamProcessorPhase::Paused);
        tracing::info!(partition_id = %self.context.partition_id, "processing paused");
    }

    fn broadcast_recovered(
        &mut self,
        context: &ReadonlyContext,
    ) -> Result<(), StreamProcessorError> {
        let recovered = |listener: &mut dyn StreamProcessorLifecycleAware| {
            listener
                .on_recovered(context)
                .map_err(|source| StreamProcessorError::Lifecycle {
                    hook: "on_recovered",
                    source,
                })
        };
        for processor in self.processors.iter_mut() {
            recovered(processor.as_mut())?;
        }
        for listener in &mut self.lifecycle_listeners {
            recovered(listener.as_mut())?;
        }
        tracing::info!(
            partition_id = %context.partition_id,
            last_processed_position = %context.last_processed_position,
            "stream processor recovered"
        );
        Ok(())
    }

    fn broadcast(&mut self, mut deliver: impl FnMut(&mut dyn StreamProcessorLifecycleAware)) {
        for processor in self.processors.iter_mut() {
            deliver(processor.as_mut());
        }
        for listener in &mut self.lifecycle_listeners {
            deliver(listener.as_mut());
        }
    }

    fn set_phase(&self, phase: StreamProcessorPhase) {
        tracing::debug!(
            partition_id = %self.context.partition_id,
            %phase,
            "stream processor phase"
        );
        self.status.set_phase(phase);
    }
}
