//! Health of a partition's stream processor.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use sluice_types::Position;
use tokio::time::Instant;

use super::StreamProcessorPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Alive but stuck: not making progress or missing liveness ticks.
    Unhealthy,
    /// The processing task is gone.
    Dead,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Dead => "dead",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Why the processor is not healthy.
    pub issue: Option<String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            issue: None,
        }
    }

    pub fn unhealthy(issue: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            issue: Some(issue.into()),
        }
    }

    pub fn dead(issue: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Dead,
            issue: Some(issue.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// State the processing task publishes for its handle.
#[derive(Debug)]
pub(crate) struct SharedStatus {
    phase: AtomicU8,
    making_progress: AtomicBool,
    started: Instant,
    last_tick_ms: AtomicU64,
    last_processed_position: AtomicI64,
    last_written_position: AtomicI64,
}

impl SharedStatus {
    pub(crate) fn new() -> Self {
        Self {
            phase: AtomicU8::new(StreamProcessorPhase::Initial.code()),
            making_progress: AtomicBool::new(true),
            started: Instant::now(),
            last_tick_ms: AtomicU64::new(0),
            last_processed_position: AtomicI64::new(Position::UNSET.as_i64()),
            last_written_position: AtomicI64::new(Position::UNSET.as_i64()),
        }
    }

    pub(crate) fn phase(&self) -> StreamProcessorPhase {
        StreamProcessorPhase::from_code(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: StreamProcessorPhase) {
        self.phase.store(phase.code(), Ordering::Release);
    }

    pub(crate) fn is_making_progress(&self) -> bool {
        self.making_progress.load(Ordering::Acquire)
    }

    pub(crate) fn set_making_progress(&self, making_progress: bool) {
        self.making_progress.store(making_progress, Ordering::Release);
    }

    /// Records that the processing task is alive right now.
    pub(crate) fn tick(&self) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_tick_ms.store(elapsed, Ordering::Release);
    }

    pub(crate) fn since_last_tick(&self) -> Duration {
        let last = Duration::from_millis(self.last_tick_ms.load(Ordering::Acquire));
        self.started.elapsed().saturating_sub(last)
    }

    pub(crate) fn set_positions(&self, last_processed: Position, last_written: Position) {
        self.last_processed_position
            .store(last_processed.as_i64(), Ordering::Release);
        self.last_written_position
            .store(last_written.as_i64(), Ordering::Release);
    }

    pub(crate) fn last_processed_position(&self) -> Position {
        Position::new(self.last_processed_position.load(Ordering::Acquire))
    }

    pub(crate) fn last_written_position(&self) -> Position {
        Position::new(self.last_written_position.load(Ordering::Acquire))
    }

    /// Derives the health report; `task_finished` tells whether the
    /// processing task has exited.
    pub(crate) fn report(&self, tick_interval: Duration, task_finished: bool) -> HealthReport {
        match self.phase() {
            StreamProcessorPhase::Failed => return HealthReport::dead("stream processor failed"),
            StreamProcessorPhase::Closed => return HealthReport::dead("stream processor is closed"),
            _ if task_finished => return HealthReport::dead("stream processor task has exited"),
            _ => {}
        }
        if !self.is_making_progress() {
            return HealthReport::unhealthy("stream processor is not making progress");
        }
        let since_tick = self.since_last_tick();
        if since_tick > tick_interval * 2 {
            return HealthReport::unhealthy(format!(
                "no liveness tick for {}ms (interval {}ms)",
                since_tick.as_millis(),
                tick_interval.as_millis()
            ));
        }
        HealthReport::healthy()
    }
}
