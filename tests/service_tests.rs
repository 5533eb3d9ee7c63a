use roda_telemetry::{
    AggregationResult, AggregationService, DATA_TOPIC, DeviceSimulator, DisplaySink,
    EngineOptions, InMemoryBus, MessageBus, PublishPolicy, RESULT_TOPIC, Reading, Result,
    StreamCoordinator, Subscription, SubscriptionId, TelemetryError, decode_result,
    encode_reading, encode_result, parse_reading, shard_for,
};
use std::collections::HashMap;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Refuses the first `failures` publishes to `Result`, then behaves.
struct FlakyResultBus {
    inner: InMemoryBus,
    failures_left: AtomicU32,
}

impl FlakyResultBus {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryBus::new(),
            failures_left: AtomicU32::new(failures),
        }
    }
}

impl MessageBus for FlakyResultBus {
    fn subscribe(&self, topic: &str) -> Result<Subscription> {
        self.inner.subscribe(topic)
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let refuse = topic == RESULT_TOPIC
            && self
                .failures_left
                .fetch_update(Relaxed, Relaxed, |n| n.checked_sub(1))
                .is_ok();
        if refuse {
            return Err(TelemetryError::PublishFailure {
                topic: topic.to_owned(),
                reason: "refused".into(),
            });
        }
        self.inner.publish(topic, payload)
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        self.inner.unsubscribe(id)
    }
}

/// Remembers how many `DataPoint` records had been delivered when the first
/// subscription was detached.
#[derive(Default)]
struct DetachRecordingBus {
    inner: InMemoryBus,
    delivered: Mutex<u64>,
    delivered_at_detach: Mutex<Option<u64>>,
}

impl MessageBus for DetachRecordingBus {
    fn subscribe(&self, topic: &str) -> Result<Subscription> {
        self.inner.subscribe(topic)
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if topic != DATA_TOPIC {
            return self.inner.publish(topic, payload);
        }
        let mut delivered = self.delivered.lock().unwrap();
        self.inner.publish(topic, payload)?;
        *delivered += 1;
        Ok(())
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        let delivered = self.delivered.lock().unwrap();
        self.inner.unsubscribe(id)?;
        self.delivered_at_detach
            .lock()
            .unwrap()
            .get_or_insert(*delivered);
        Ok(())
    }
}

fn options(window_size: usize, shards: usize) -> EngineOptions {
    EngineOptions {
        window_size,
        shards,
        ..Default::default()
    }
}

fn collect_results(sub: &Subscription) -> Vec<AggregationResult> {
    std::iter::from_fn(|| sub.try_recv())
        .map(|raw| decode_result(&raw).unwrap())
        .collect()
}

fn group_by_device(results: &[AggregationResult]) -> HashMap<i32, Vec<AggregationResult>> {
    let mut grouped: HashMap<i32, Vec<AggregationResult>> = HashMap::new();
    for r in results {
        grouped.entry(r.device_id).or_default().push(*r);
    }
    grouped
}

#[test]
fn test_end_to_end_single_device() {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(3, 2)).unwrap();

    for raw in ["1.0 7", "2.0 7", "3.0 7"] {
        bus.publish(DATA_TOPIC, raw).unwrap();
    }
    let stats = service.shutdown();

    let raw: Vec<String> = std::iter::from_fn(|| results.try_recv()).collect();
    assert_eq!(raw, vec!["7 2.000 0.667 3.000 1.000".to_string()]);
    assert_eq!(stats.received, 3);
    assert_eq!(stats.emitted, 1);
    assert_eq!(stats.published, 1);
    assert_eq!(stats.devices, 1);
}

#[test]
fn test_shutdown_drains_everything_in_flight() {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(5, 4)).unwrap();

    let devices = 16;
    let per_device = 200;
    for i in 0..per_device {
        for d in 0..devices {
            bus.publish(DATA_TOPIC, &format!("{}.000 {}", i, d)).unwrap();
        }
    }
    let stats = service.shutdown();

    let expected = (devices * (per_device - 5 + 1)) as u64;
    assert_eq!(stats.received, (devices * per_device) as u64);
    assert_eq!(stats.emitted, expected);
    assert_eq!(stats.published, expected);
    assert_eq!(stats.devices, devices as u64);
    assert_eq!(collect_results(&results).len() as u64, expected);
}

#[test]
fn test_per_device_order_is_preserved_across_shards() {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(2, 3)).unwrap();

    for i in 0..500 {
        for d in [10, 20, 30, 40] {
            bus.publish(DATA_TOPIC, &format!("{} {}", i, d)).unwrap();
        }
    }
    service.shutdown();

    let grouped = group_by_device(&collect_results(&results));
    assert_eq!(grouped.len(), 4);
    for (device, series) in grouped {
        assert_eq!(series.len(), 499, "device {device}");
        for (i, r) in series.iter().enumerate() {
            // Window is [i, i+1] when readings are applied in order.
            assert_eq!(r.min, i as f64, "device {device} out of order");
            assert_eq!(r.max, (i + 1) as f64, "device {device} out of order");
        }
    }
}

#[test]
fn test_matches_single_threaded_coordinator() {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(4, 4)).unwrap();

    let mut reference = StreamCoordinator::new(4);
    let mut expected: Vec<AggregationResult> = Vec::new();
    let mut sims: Vec<DeviceSimulator> = (1..=6)
        .map(|id| DeviceSimulator::with_seed(id, 10.0 * id as f64, 2.0, id as u64))
        .collect();
    for _ in 0..100 {
        for sim in sims.iter_mut() {
            let record = encode_reading(&sim.next_reading());
            bus.publish(DATA_TOPIC, &record).unwrap();
            expected.extend(reference.on_record(&record));
        }
    }
    service.shutdown();

    let actual = group_by_device(&collect_results(&results));
    let expected = group_by_device(&expected);
    assert_eq!(actual.len(), expected.len());
    for (device, series) in expected {
        let got = &actual[&device];
        assert_eq!(got.len(), series.len());
        for (a, e) in got.iter().zip(series.iter()) {
            // Published values went through 3-decimal formatting.
            assert!((a.mean - e.mean).abs() <= 0.0005 + 1e-9);
            assert!((a.variance - e.variance).abs() <= 0.0005 + 1e-9);
            assert!((a.max - e.max).abs() <= 0.0005 + 1e-9);
            assert!((a.min - e.min).abs() <= 0.0005 + 1e-9);
        }
    }
}

#[test]
fn test_malformed_records_do_not_stop_the_stream() {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(2, 2)).unwrap();

    for raw in ["1.0 1", "abc xyz", "3.0 1", "", "1.0 2 3", "5.0 1"] {
        bus.publish(DATA_TOPIC, raw).unwrap();
    }
    let stats = service.shutdown();

    let raw: Vec<String> = std::iter::from_fn(|| results.try_recv()).collect();
    assert_eq!(
        raw,
        vec!["1 2.000 1.000 3.000 1.000", "1 4.000 1.000 5.000 3.000"]
    );
    assert_eq!(stats.received, 6);
    assert_eq!(stats.malformed, 3);
}

#[test]
fn test_no_results_before_threshold() {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(10, 2)).unwrap();

    for d in 0..5 {
        for i in 0..9 {
            bus.publish(DATA_TOPIC, &format!("{} {}", i, d)).unwrap();
        }
    }
    let stats = service.shutdown();
    assert_eq!(stats.emitted, 0);
    assert!(results.try_recv().is_none());
}

fn reference_results(window_size: usize, records: &[String]) -> Vec<String> {
    let mut reference = StreamCoordinator::new(window_size);
    records
        .iter()
        .filter_map(|r| reference.on_record(r))
        .map(|r| encode_result(&r))
        .collect()
}

#[test]
fn test_dropped_results_do_not_corrupt_state() {
    let bus = Arc::new(FlakyResultBus::new(3));
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(2, 1)).unwrap();

    let records: Vec<String> = (1..=10).map(|i| format!("{}.0 1", i)).collect();
    for raw in &records {
        bus.publish(DATA_TOPIC, raw).unwrap();
    }
    assert!(service.is_healthy());
    let stats = service.shutdown();

    assert_eq!(stats.emitted, 9);
    assert_eq!(stats.publish_failures, 3);
    assert_eq!(stats.published, 6);

    // Windows kept sliding while results were refused.
    let got: Vec<String> = std::iter::from_fn(|| results.try_recv()).collect();
    assert_eq!(got, reference_results(2, &records)[3..].to_vec());
}

#[test]
fn test_retry_policy_recovers_refused_results() {
    let bus = Arc::new(FlakyResultBus::new(2));
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let retrying = EngineOptions {
        publish_policy: PublishPolicy::Retry {
            attempts: 2,
            backoff: Duration::from_millis(1),
        },
        ..options(3, 1)
    };
    let service = AggregationService::start(bus.clone(), retrying).unwrap();

    let records: Vec<String> = (1..=8).map(|i| format!("{} 4", i * 2)).collect();
    for raw in &records {
        bus.publish(DATA_TOPIC, raw).unwrap();
    }
    let stats = service.shutdown();

    assert_eq!(stats.emitted, 6);
    assert_eq!(stats.published, 6);
    assert_eq!(stats.publish_failures, 0);
    let got: Vec<String> = std::iter::from_fn(|| results.try_recv()).collect();
    assert_eq!(got, reference_results(3, &records));
}

#[test]
fn test_retry_policy_drops_after_exhausting_attempts() {
    // Two results use up two tries each, the third succeeds on its retry.
    let bus = Arc::new(FlakyResultBus::new(5));
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let retrying = EngineOptions {
        publish_policy: PublishPolicy::Retry {
            attempts: 1,
            backoff: Duration::from_millis(1),
        },
        ..options(1, 1)
    };
    let service = AggregationService::start(bus.clone(), retrying).unwrap();

    let records: Vec<String> = (0..5).map(|i| format!("{} 2", i)).collect();
    for raw in &records {
        bus.publish(DATA_TOPIC, raw).unwrap();
    }
    let stats = service.shutdown();

    assert_eq!(stats.emitted, 5);
    assert_eq!(stats.publish_failures, 2);
    assert_eq!(stats.published, 3);
    let got: Vec<String> = std::iter::from_fn(|| results.try_recv()).collect();
    assert_eq!(got, reference_results(1, &records)[2..].to_vec());
}

#[test]
fn test_shutdown_ignores_records_published_during_drain() {
    let bus = Arc::new(DetachRecordingBus::default());
    let service = AggregationService::start(bus.clone(), options(4, 2)).unwrap();
    let running = Arc::new(AtomicBool::new(true));

    let producer = {
        let bus = bus.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut sent = 0u64;
            while running.load(Relaxed) {
                bus.publish(DATA_TOPIC, &format!("{} {}", sent % 100, sent % 8))
                    .unwrap();
                sent += 1;
            }
            sent
        })
    };

    while *bus.delivered.lock().unwrap() < 10_000 {
        thread::sleep(Duration::from_millis(1));
    }
    let stats = service.shutdown();
    running.store(false, Relaxed);
    let sent = producer.join().unwrap();

    let at_detach = bus.delivered_at_detach.lock().unwrap().unwrap();
    assert_eq!(stats.received, at_detach);
    assert_eq!(stats.malformed, 0);
    assert!(sent >= at_detach);
    assert_eq!(bus.inner.subscriber_count(DATA_TOPIC), 0);
}

#[test]
fn test_dropping_the_service_detaches_it() {
    let bus = Arc::new(InMemoryBus::new());
    {
        let _service = AggregationService::start(bus.clone(), options(2, 2)).unwrap();
        assert_eq!(bus.subscriber_count(DATA_TOPIC), 1);
    }
    assert_eq!(bus.subscriber_count(DATA_TOPIC), 0);
}

#[test]
fn test_rejected_records_are_counted_as_malformed() {
    let bus = Arc::new(InMemoryBus::new());
    let service = AggregationService::start(bus.clone(), options(2, 1)).unwrap();
    service.reject_record(b"\xff\xfe 7", "not valid UTF-8");
    bus.publish(DATA_TOPIC, "1.0 7").unwrap();
    let stats = service.shutdown();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.malformed, 1);
}

#[test]
fn test_rejects_invalid_options() {
    let bus = Arc::new(InMemoryBus::new());
    assert!(matches!(
        AggregationService::start(bus.clone(), options(0, 1)),
        Err(TelemetryError::InvalidConfig(_))
    ));
    assert!(matches!(
        AggregationService::start(bus, options(3, 0)),
        Err(TelemetryError::InvalidConfig(_))
    ));
}

#[test]
fn test_concurrent_producers_with_display_sink() {
    let bus = Arc::new(InMemoryBus::new());
    let results = bus.subscribe(RESULT_TOPIC).unwrap();
    let service = AggregationService::start(bus.clone(), options(10, 3)).unwrap();
    let running = Arc::new(AtomicBool::new(true));

    let producers: Vec<_> = (1..=4)
        .map(|id| {
            let bus = bus.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut sim = DeviceSimulator::with_seed(id, 100.0, 3.0, 99 + id as u64);
                sim.run(bus.as_ref(), 250, Duration::ZERO, &running).unwrap()
            })
        })
        .collect();
    for p in producers {
        assert_eq!(p.join().unwrap(), 250);
    }
    let stats = service.shutdown();
    assert_eq!(stats.received, 1000);
    assert_eq!(stats.emitted, 4 * (250 - 10 + 1));

    let mut display = DisplaySink::new(50);
    assert_eq!(display.drain(&results), 4 * (250 - 10 + 1));
    assert_eq!(display.devices(), vec![1, 2, 3, 4]);
    for device in 1..=4 {
        let series = display.series(device).unwrap();
        assert_eq!(series.len(), 50);
        assert_eq!(series.received, 241);
        assert!(series.variance.iter().all(|v| *v >= 0.0));
    }
}

#[test]
fn test_every_device_lands_on_one_shard() {
    let mut seen: HashMap<usize, Vec<i32>> = HashMap::new();
    for device in 0..64 {
        seen.entry(shard_for(device, 4)).or_default().push(device);
    }
    let total: usize = seen.values().map(Vec::len).sum();
    assert_eq!(total, 64);
    assert!(seen.keys().all(|s| *s < 4));
    // Sanity: the parser accepts what the simulator encodes.
    let r: Reading = parse_reading(&encode_reading(&Reading::new(3, 1.0))).unwrap();
    assert_eq!(r, Reading::new(3, 1.0));
}
