use crate::aggregator::AggregationResult;
use crate::bus::Subscription;
use crate::encoder::decode_result;
use crate::error::Result;
use crate::reading::DeviceId;
use fxhash::FxHashMap;
use spdlog::warn;
use std::collections::VecDeque;

/// The most recent results of one device, oldest first.
#[derive(Debug, Default)]
pub struct ResultSeries {
    pub mean: VecDeque<f64>,
    pub variance: VecDeque<f64>,
    pub max: VecDeque<f64>,
    pub min: VecDeque<f64>,
    /// Results ever received, including those rotated out.
    pub received: u64,
}

impl ResultSeries {
    fn push(&mut self, result: &AggregationResult, history: usize) {
        for (series, value) in [
            (&mut self.mean, result.mean),
            (&mut self.variance, result.variance),
            (&mut self.max, result.max),
            (&mut self.min, result.min),
        ] {
            if series.len() == history {
                series.pop_front();
            }
            series.push_back(value);
        }
        self.received += 1;
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

/// Consumes published results and keeps a bounded per-device history of each
/// statistic for rendering.
pub struct DisplaySink {
    history: usize,
    series: FxHashMap<DeviceId, ResultSeries>,
    malformed: u64,
}

impl DisplaySink {
    pub fn new(history: usize) -> Self {
        assert!(history > 0, "history must be greater than 0");
        Self {
            history,
            series: FxHashMap::default(),
            malformed: 0,
        }
    }

    pub fn on_record(&mut self, raw: &str) -> Result<AggregationResult> {
        let result = decode_result(raw).inspect_err(|_| self.malformed += 1)?;
        self.series
            .entry(result.device_id)
            .or_default()
            .push(&result, self.history);
        Ok(result)
    }

    /// Consumes every pending record on `subscription`. Returns how many were
    /// accepted.
    pub fn drain(&mut self, subscription: &Subscription) -> usize {
        let mut accepted = 0;
        while let Some(raw) = subscription.try_recv() {
            match self.on_record(&raw) {
                Ok(_) => accepted += 1,
                Err(err) => warn!("Ignoring result record: {}", err),
            }
        }
        accepted
    }

    pub fn series(&self, device: DeviceId) -> Option<&ResultSeries> {
        self.series.get(&device)
    }

    /// Devices with at least one result, ascending.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.series.keys().copied().collect();
        devices.sort_unstable();
        devices
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// One-line summary of the latest result of `device`.
    pub fn render(&self, device: DeviceId) -> Option<String> {
        let s = self.series.get(&device)?;
        Some(format!(
            "Device {} [{} results] mean={:.3} variance={:.3} max={:.3} min={:.3}",
            device,
            s.received,
            s.mean.back()?,
            s.variance.back()?,
            s.max.back()?,
            s.min.back()?
        ))
    }
}
