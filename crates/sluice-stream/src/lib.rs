//! # sluice-stream: Event-sourced stream processor
//!
//! Turns a partition's log of commands and events into state, one record at
//! a time, on a single tokio task per partition.
//!
//! ## Key Principles
//!
//! - **Replay before processing**: state is rebuilt from events first
//! - **One transaction per command**: processor changes, follow-up records
//!   and the processed position commit together
//! - **Write before commit**: follow-up records reach the log before the
//!   transaction commits, so a crash only ever repeats replay work
//! - **Poison isolation**: a command that keeps failing is rejected and its
//!   entity blacklisted
//!
//! ## Architecture
//!
//! - [`processor_map`]: dispatch table from record type to processor
//! - [`retry`]: the retry disciplines used around writes and transactions
//! - [`replay`]: the replay state machine
//! - [`processing`]: the processing state machine
//! - [`stream_processor`]: the orchestrator, its handle and health
//!
//! ## Example
//!
//! ```ignore
//! use sluice_stream::{FnProcessor, StreamProcessor};
//!
//! let processor = StreamProcessor::builder(log, db)
//!     .command_processor(ValueType::Job, intent::job::COMPLETE, FnProcessor::new(complete_job))
//!     .event_applier(applier)
//!     .build()?;
//! let handle = processor.start();
//! // ...
//! handle.close().await?;
//! ```

mod context;
mod error;
mod event_applier;
pub mod lifecycle;
mod listener;
mod metrics;
pub mod processing;
mod processor;
pub mod processor_map;
mod record;
pub mod replay;
mod response;
mod result;
pub mod retry;
mod settings;
mod snapshot;
pub mod stream_processor;

#[cfg(test)]
mod test_support;

pub use context::PartitionContext;
pub use error::{ProcessingError, StreamProcessorError};
pub use event_applier::{EventApplier, NoopEventApplier};
pub use lifecycle::{NoopLifecycle, ReadonlyContext, StreamProcessorLifecycleAware};
pub use listener::{NoopListener, StreamProcessorListener};
pub use metrics::{MetricsSnapshot, ProcessingMetrics};
pub use processing::{ErrorHandlingPhase, ProcessingPhase, ProcessingStateMachine, StepOutcome};
pub use processor::{FnProcessor, ProcessingContext, RecordProcessor};
pub use processor_map::{ProcessorId, RecordProcessorMap, RegistrationError};
pub use record::{CopiedRecord, TypedRecord};
pub use replay::{LastProcessingPositions, ReplayStateMachine, ReplayStep};
pub use response::{
    ChannelResponseWriter, CommandResponseWriter, NoopResponseWriter, ProcessingResponse,
};
pub use result::{ProcessingResult, SideEffect};
pub use retry::{
    AbortableRetryStrategy, EndlessRetryStrategy, RecoverableRetryStrategy, RetryError, Retryable,
};
pub use settings::{StreamProcessorMode, StreamProcessorSettings};
pub use snapshot::SnapshotStore;
pub use stream_processor::{
    HealthReport, HealthStatus, StreamProcessor, StreamProcessorBuilder, StreamProcessorHandle,
    StreamProcessorPhase,
};
