use crate::error::{Result, TelemetryError};
use fxhash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Topic carrying raw `"<value> <deviceID>"` readings.
pub const DATA_TOPIC: &str = "DataPoint";
/// Topic carrying encoded aggregation results.
pub const RESULT_TOPIC: &str = "Result";

/// Topic-based transport the engine is wired to.
///
/// Every payload published to a topic is delivered to every subscription that
/// is alive at that moment. Publishing to a topic nobody listens to is not an
/// error.
pub trait MessageBus: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<Subscription>;

    fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Stops delivery to a subscription. Payloads it already holds stay
    /// readable; once they are consumed it reports itself closed.
    fn unsubscribe(&self, id: &SubscriptionId) -> Result<()>;
}

/// Identifies one subscription on a bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    pub topic: String,
    pub seq: u64,
}

/// Pull handle for one topic subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    rx: Receiver<String>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, rx: Receiver<String>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.id.topic
    }

    /// Returns the next pending payload, if any. A closed subscription simply
    /// has nothing pending.
    pub fn try_recv(&self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(payload) => Some(payload),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next payload.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<String>> {
        match self.rx.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TelemetryError::SubscriptionClosed),
        }
    }
}

/// Process-local [`MessageBus`] backed by one unbounded channel per
/// subscription. No durability and no delivery across processes.
#[derive(Default)]
pub struct InMemoryBus {
    topics: Mutex<FxHashMap<String, Vec<(u64, Sender<String>)>>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disconnects every subscription. Later publishes and subscribes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.topics().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live subscriptions on `topic` as of the last publish.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics().get(topic).map_or(0, Vec::len)
    }

    fn topics(&self) -> MutexGuard<'_, FxHashMap<String, Vec<(u64, Sender<String>)>>> {
        // Senders stay consistent even if a holder panicked.
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageBus for InMemoryBus {
    fn subscribe(&self, topic: &str) -> Result<Subscription> {
        if self.is_closed() {
            return Err(TelemetryError::SubscriptionClosed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.topics().entry(topic.to_owned()).or_default().push((seq, tx));
        Ok(Subscription::new(
            SubscriptionId {
                topic: topic.to_owned(),
                seq,
            },
            rx,
        ))
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if self.is_closed() {
            return Err(TelemetryError::PublishFailure {
                topic: topic.to_owned(),
                reason: "bus is closed".into(),
            });
        }
        if let Some(subscribers) = self.topics().get_mut(topic) {
            subscribers.retain(|(_, tx)| tx.send(payload.to_owned()).is_ok());
        }
        Ok(())
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        // Publishing holds the same lock, so no payload lands after this.
        if let Some(subscribers) = self.topics().get_mut(&id.topic) {
            subscribers.retain(|(seq, _)| *seq != id.seq);
        }
        Ok(())
    }
}
