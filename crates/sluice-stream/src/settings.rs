use std::time::Duration;

use sluice_config::{ProcessingConfig, SluiceConfig};
use sluice_types::PartitionId;

pub use sluice_config::ProcessingMode as StreamProcessorMode;

/// Runtime knobs of one partition's stream processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProcessorSettings {
    /// Partition the log must belong to; any partition when unset.
    pub partition_id: Option<PartitionId>,
    pub mode: StreamProcessorMode,
    /// Wait before retrying after a recoverable failure.
    pub recoverable_retry_delay: Duration,
    /// Period of the liveness tick; health turns unhealthy after two
    /// missed ticks.
    pub health_tick_interval: Duration,
    pub control_queue_capacity: usize,
}

impl Default for StreamProcessorSettings {
    fn default() -> Self {
        Self::from(&ProcessingConfig::default())
    }
}

impl From<&ProcessingConfig> for StreamProcessorSettings {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            partition_id: None,
            mode: config.mode,
            recoverable_retry_delay: Duration::from_millis(config.recoverable_retry_delay_ms),
            // A zero period would panic the partition task.
            health_tick_interval: Duration::from_millis(config.health_tick_interval_ms.max(1)),
            control_queue_capacity: config.control_queue_capacity.max(1),
        }
    }
}

impl From<&SluiceConfig> for StreamProcessorSettings {
    fn from(config: &SluiceConfig) -> Self {
        Self {
            partition_id: Some(PartitionId::new(config.partition.id)),
            ..Self::from(&config.processing)
        }
    }
}
