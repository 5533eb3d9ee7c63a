use crate::error::{Result, TelemetryError};
use crate::publisher::PublishPolicy;
use std::time::Duration;

/// Construction-time settings of an [`AggregationService`](crate::AggregationService).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Samples per window, and the count at which a device starts emitting.
    pub window_size: usize,
    /// Number of shard workers. Each device is owned by exactly one shard.
    pub shards: usize,
    pub publish_policy: PublishPolicy,
    /// Sleep applied by an idle worker after it has spun and yielded.
    pub idle_sleep: Duration,
    /// Pin workers to cores, round-robin.
    pub pin_cores: bool,
    /// Throughput and latency are logged every this many readings per shard.
    pub report_interval: usize,
    /// Every n-th reading is timed into the latency histogram.
    pub latency_sample_rate: u64,
    /// Most inbound records the dispatcher routes before re-checking its run flag.
    pub dispatch_batch: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            window_size: 10,
            shards: 4,
            publish_policy: PublishPolicy::Drop,
            idle_sleep: Duration::from_millis(1),
            pin_cores: false,
            report_interval: 100_000,
            latency_sample_rate: 100,
            dispatch_batch: 1024,
        }
    }
}

impl EngineOptions {
    pub fn with_window_size(window_size: usize) -> Self {
        Self {
            window_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(TelemetryError::InvalidConfig(
                "window_size must be at least 1".into(),
            ));
        }
        if self.shards == 0 {
            return Err(TelemetryError::InvalidConfig("shards must be at least 1".into()));
        }
        if self.report_interval == 0 {
            return Err(TelemetryError::InvalidConfig(
                "report_interval must be at least 1".into(),
            ));
        }
        if self.latency_sample_rate == 0 {
            return Err(TelemetryError::InvalidConfig(
                "latency_sample_rate must be at least 1".into(),
            ));
        }
        if self.dispatch_batch == 0 {
            return Err(TelemetryError::InvalidConfig(
                "dispatch_batch must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
