use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

/// Operation counters shared by the dispatcher and every shard.
#[derive(Debug, Default)]
pub struct OpCounter {
    received: AtomicU64,
    malformed: AtomicU64,
    devices: AtomicU64,
    emitted: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of an [`OpCounter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    /// Records taken off the inbound topic.
    pub received: u64,
    /// Records dropped because they could not be parsed.
    pub malformed: u64,
    /// Distinct devices seen.
    pub devices: u64,
    /// Aggregation results produced.
    pub emitted: u64,
    /// Results handed to the bus successfully.
    pub published: u64,
    /// Results dropped after the publish policy gave up.
    pub publish_failures: u64,
}

impl OpCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline(always)]
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_device(&self) {
        self.devices.fetch_add(1, Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Relaxed);
    }

    /// Sum of every counter; stops moving once the pipeline is idle.
    pub fn total_op_count(&self) -> u64 {
        let s = self.snapshot();
        s.received + s.malformed + s.devices + s.emitted + s.published + s.publish_failures
    }

    pub fn snapshot(&self) -> OpStats {
        OpStats {
            received: self.received.load(Relaxed),
            malformed: self.malformed.load(Relaxed),
            devices: self.devices.load(Relaxed),
            emitted: self.emitted.load(Relaxed),
            published: self.published.load(Relaxed),
            publish_failures: self.publish_failures.load(Relaxed),
        }
    }
}
