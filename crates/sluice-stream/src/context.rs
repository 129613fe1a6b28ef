use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sluice_state::TransactionContext;
use sluice_types::{PartitionId, RecordValues};

use crate::{ProcessingMetrics, StreamProcessorError, StreamProcessorListener};

/// Shared pieces both state machines work with.
#[derive(Clone)]
pub struct PartitionContext {
    pub partition_id: PartitionId,
    pub db: Arc<dyn TransactionContext>,
    pub values: Arc<RecordValues>,
    pub listener: Arc<dyn StreamProcessorListener>,
    pub metrics: Arc<ProcessingMetrics>,
    /// Set once the partition closes; every retry loop watches it.
    pub abort: Arc<AtomicBool>,
    pub recoverable_retry_delay: Duration,
}

impl PartitionContext {
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Abort condition handed to the retry strategies.
    pub fn abort_condition(&self) -> impl Fn() -> bool + '_ {
        || self.is_aborted()
    }

    /// Waits the recoverable retry delay, returning early with
    /// [`StreamProcessorError::Aborted`] if the partition is closing.
    pub async fn wait_before_retry(&self) -> Result<(), StreamProcessorError> {
        if self.is_aborted() {
            return Err(StreamProcessorError::Aborted);
        }
        tokio::time::sleep(self.recoverable_retry_delay).await;
        if self.is_aborted() {
            return Err(StreamProcessorError::Aborted);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PartitionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionContext")
            .field("partition_id", &self.partition_id)
            .field("aborted", &self.is_aborted())
            .field("recoverable_retry_delay", &self.recoverable_retry_delay)
            .finish_non_exhaustive()
    }
}
