use crate::bus::MessageBus;
use crate::op_counter::OpCounter;
use spdlog::{debug, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What to do with a result the bus refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// Log, count and discard the result.
    #[default]
    Drop,
    /// Try up to `attempts` more times, sleeping `backoff` in between, then
    /// discard it.
    Retry { attempts: u32, backoff: Duration },
}

/// Publishes encoded results to one topic under a [`PublishPolicy`].
///
/// A failed publish never touches window state; the worst outcome is a
/// dropped result.
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    policy: PublishPolicy,
    ops: Arc<OpCounter>,
}

impl Publisher {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
        policy: PublishPolicy,
        ops: Arc<OpCounter>,
    ) -> Self {
        Self {
            bus,
            topic: topic.into(),
            policy,
            ops,
        }
    }

    /// Returns whether the payload reached the bus.
    pub fn publish(&self, payload: &str) -> bool {
        let mut last_err = match self.bus.publish(&self.topic, payload) {
            Ok(()) => {
                self.ops.record_published();
                return true;
            }
            Err(err) => err,
        };

        if let PublishPolicy::Retry { attempts, backoff } = self.policy {
            for attempt in 1..=attempts {
                thread::sleep(backoff);
                match self.bus.publish(&self.topic, payload) {
                    Ok(()) => {
                        debug!("Published to {} after {} retries", self.topic, attempt);
                        self.ops.record_published();
                        return true;
                    }
                    Err(err) => last_err = err,
                }
            }
        }

        self.ops.record_publish_failure();
        warn!("Dropping result {:?}: {}", payload, last_err);
        false
    }
}
