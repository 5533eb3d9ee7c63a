use crate::aggregator::{AggregationResult, aggregate};
use crate::op_counter::OpCounter;
use crate::reading::{Reading, parse_reading};
use crate::stage::{OutputCollector, Stage};
use crate::window::{DeviceState, WindowStore};
use spdlog::warn;
use std::sync::Arc;

/// Drives parse, window update and aggregation for one dispatch context.
///
/// Every device handled by a coordinator is updated strictly in the order its
/// readings are fed in. Once a device holds `window_size` samples, every
/// further reading recomputes the statistics over the newest `window_size`
/// values.
pub struct StreamCoordinator {
    store: WindowStore,
    scratch: Vec<f64>,
    ops: Arc<OpCounter>,
}

impl StreamCoordinator {
    pub fn new(window_size: usize) -> Self {
        Self::with_counter(window_size, OpCounter::new())
    }

    pub fn with_counter(window_size: usize, ops: Arc<OpCounter>) -> Self {
        Self {
            store: WindowStore::new(window_size),
            scratch: Vec::with_capacity(window_size),
            ops,
        }
    }

    /// Parses and handles a raw inbound record. Malformed records are logged
    /// and dropped without touching any window.
    pub fn on_record(&mut self, raw: &str) -> Option<AggregationResult> {
        self.ops.record_received();
        match parse_reading(raw) {
            Ok(reading) => self.on_reading(reading),
            Err(err) => {
                self.ops.record_malformed();
                warn!("Dropping inbound record: {}", err);
                None
            }
        }
    }

    /// Appends a parsed reading and returns the device's statistics if its
    /// window is full.
    pub fn on_reading(&mut self, reading: Reading) -> Option<AggregationResult> {
        let device = reading.device_id;
        let known_devices = self.store.device_count();
        self.store.append(device, reading.value);
        if self.store.device_count() > known_devices {
            self.ops.record_device();
        }

        if self.store.state(device) == DeviceState::Collecting {
            return None;
        }

        let window_size = self.store.window_size();
        if let Err(err) = self.store.latest_into(device, window_size, &mut self.scratch) {
            panic!("ready window could not produce a snapshot: {err}");
        }
        let stats = match aggregate(&self.scratch) {
            Ok(stats) => stats,
            Err(err) => panic!("ready window aggregated to an error: {err}"),
        };

        self.ops.record_emitted();
        Some(AggregationResult::new(device, stats))
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn ops(&self) -> &Arc<OpCounter> {
        &self.ops
    }
}

impl Stage<Reading, AggregationResult> for StreamCoordinator {
    #[inline(always)]
    fn process<C>(&mut self, data: Reading, collector: &mut C)
    where
        C: OutputCollector<AggregationResult>,
    {
        if let Some(result) = self.on_reading(data) {
            collector.push(result);
        }
    }
}
