use crate::bus::{DATA_TOPIC, MessageBus, RESULT_TOPIC, SubscriptionId};
use crate::coordinator::StreamCoordinator;
use crate::engine::WorkerEngine;
use crate::error::Result;
use crate::op_counter::{OpCounter, OpStats};
use crate::options::EngineOptions;
use crate::pipe;
use crate::pipe::{encode, latency, parse, progress};
use crate::publisher::Publisher;
use crate::reading::{DeviceId, Reading};
use crate::stage::Stage;
use spdlog::{info, warn};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Index of the shard that owns `device`.
#[inline(always)]
pub fn shard_for(device: DeviceId, shards: usize) -> usize {
    (fxhash::hash64(&device) % shards as u64) as usize
}

/// The running aggregation engine.
///
/// One dispatcher worker takes records off the `DataPoint` subscription,
/// parses them and routes each reading to the shard owning its device. Every
/// shard worker runs its own [`StreamCoordinator`], so a device's window is
/// only ever touched by one thread, in arrival order. Results are encoded and
/// published to `Result`.
///
/// Dropping the service shuts it down the same way [`shutdown`] does.
///
/// [`shutdown`]: AggregationService::shutdown
pub struct AggregationService {
    engine: WorkerEngine,
    ops: Arc<OpCounter>,
    options: EngineOptions,
    bus: Arc<dyn MessageBus>,
    inbound: Option<SubscriptionId>,
}

impl AggregationService {
    pub fn start(bus: Arc<dyn MessageBus>, options: EngineOptions) -> Result<Self> {
        options.validate()?;

        let ops = OpCounter::new();
        let mut engine = WorkerEngine::new(options.idle_sleep);
        engine.set_pin_cores(options.pin_cores);

        let subscription = bus.subscribe(DATA_TOPIC)?;
        let inbound = subscription.id().clone();

        let mut shard_senders: Vec<Sender<Reading>> = Vec::with_capacity(options.shards);
        let mut shard_workers = Vec::with_capacity(options.shards);
        for shard in 0..options.shards {
            let (tx, rx) = mpsc::channel::<Reading>();
            shard_senders.push(tx);

            let name = format!("shard-{}", shard);
            let publisher = Publisher::new(
                bus.clone(),
                RESULT_TOPIC,
                options.publish_policy,
                ops.clone(),
            );
            let mut pipeline = pipe![
                progress::<Reading>(name.clone(), options.report_interval),
                latency::<Reading, String, _>(
                    name.clone(),
                    options.report_interval,
                    options.latency_sample_rate,
                    pipe![
                        StreamCoordinator::with_counter(options.window_size, ops.clone()),
                        encode(),
                    ],
                ),
            ];

            shard_workers.push((
                name,
                move || match rx.try_recv() {
                    Ok(reading) => {
                        pipeline.process(reading, &mut |payload: String| {
                            publisher.publish(&payload);
                        });
                        true
                    }
                    Err(_) => false,
                },
            ));
        }

        // The dispatcher starts first so shutdown drains it before the shards.
        let shards = options.shards;
        let batch = options.dispatch_batch;
        let mut parse_stage = parse(ops.clone());
        engine.run_worker("dispatcher", move || {
            let mut routed = 0;
            while routed < batch {
                let Some(raw) = subscription.try_recv() else {
                    break;
                };
                routed += 1;
                parse_stage.process(raw, &mut |reading: Reading| {
                    let shard = shard_for(reading.device_id, shards);
                    // Shard queues live until the dispatcher itself is dropped.
                    let _ = shard_senders[shard].send(reading);
                });
            }
            routed > 0
        });
        for (name, worker) in shard_workers {
            engine.run_worker(name, worker);
        }

        info!(
            "Aggregation service started: window_size={}, shards={}",
            options.window_size, options.shards
        );
        Ok(Self {
            engine,
            ops,
            options,
            bus,
            inbound: Some(inbound),
        })
    }

    pub fn stats(&self) -> OpStats {
        self.ops.snapshot()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn is_healthy(&self) -> bool {
        !self.engine.is_any_worker_panicked()
    }

    /// Counts a record that could not even be handed to the bus, such as an
    /// input line that is not valid UTF-8, as received and malformed.
    pub fn reject_record(&self, raw: &[u8], reason: &str) {
        self.ops.record_received();
        self.ops.record_malformed();
        warn!("Dropping inbound record {:?}: {}", String::from_utf8_lossy(raw), reason);
    }

    /// Waits until no counter has moved for a few milliseconds, or `timeout`.
    pub fn await_idle(&self, timeout: Duration) {
        let start = Instant::now();
        let mut last_op_count = self.ops.total_op_count();
        loop {
            sleep(Duration::from_millis(5));
            let new_op_count = self.ops.total_op_count();
            if new_op_count == last_op_count || start.elapsed() > timeout {
                break;
            }
            last_op_count = new_op_count;
        }
    }

    /// Stops taking records off the bus, drains everything already received
    /// through the shards and returns the final counters.
    ///
    /// The inbound subscription is detached first, so records published
    /// while the drain runs are never read.
    pub fn shutdown(mut self) -> OpStats {
        self.stop();
        let stats = self.ops.snapshot();
        info!(
            "Aggregation service stopped: received={}, malformed={}, devices={}, emitted={}, published={}, publish_failures={}",
            stats.received,
            stats.malformed,
            stats.devices,
            stats.emitted,
            stats.published,
            stats.publish_failures
        );
        stats
    }

    fn stop(&mut self) {
        let Some(inbound) = self.inbound.take() else {
            return;
        };
        if let Err(err) = self.bus.unsubscribe(&inbound) {
            warn!("Could not detach from {}: {}", inbound.topic, err);
        }
        self.engine.shutdown();
    }
}

impl Drop for AggregationService {
    fn drop(&mut self) {
        self.stop();
    }
}
