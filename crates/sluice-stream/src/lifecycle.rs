//! Partition lifecycle notifications.
//!
//! Every registered record processor, and every extra listener passed to
//! the builder, receives these callbacks on the partition's task:
//!
//! ```text
//! on_recovered ─► (on_paused ─► on_resumed)* ─► on_close
//!        └──────────────────────────────────► on_failed
//! ```
//!
//! `on_paused` is only delivered after `on_recovered`, and `on_resumed`
//! only after a delivered `on_paused`.

use sluice_types::{PartitionId, Position};

/// Read-only view of the partition handed to [`StreamProcessorLifecycleAware::on_recovered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadonlyContext {
    pub partition_id: PartitionId,
    pub last_processed_position: Position,
    pub last_written_position: Position,
}

/// Receives lifecycle transitions of a partition's stream processor.
pub trait StreamProcessorLifecycleAware: Send {
    /// Replay finished; processing starts right after this returns.
    ///
    /// An error fails the partition.
    fn on_recovered(&mut self, context: &ReadonlyContext) -> anyhow::Result<()>;

    fn on_paused(&mut self);

    fn on_resumed(&mut self);

    fn on_failed(&mut self);

    fn on_close(&mut self);
}

/// Lifecycle listener that ignores every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

impl StreamProcessorLifecycleAware for NoopLifecycle {
    fn on_recovered(&mut self, _context: &ReadonlyContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_paused(&mut self) {}

    fn on_resumed(&mut self) {}

    fn on_failed(&mut self) {}

    fn on_close(&mut self) {}
}
