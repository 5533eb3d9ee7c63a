use crate::error::{Result, TelemetryError};
use crate::reading::DeviceId;

/// Summary statistics of one window, not yet tied to a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub mean: f64,
    pub variance: f64,
    pub max: f64,
    pub min: f64,
}

/// Statistics published for a device each time its window triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregationResult {
    pub mean: f64,
    pub variance: f64,
    pub max: f64,
    pub min: f64,
    pub device_id: DeviceId,
}

impl AggregationResult {
    pub fn new(device_id: DeviceId, stats: Statistics) -> Self {
        Self {
            mean: stats.mean,
            variance: stats.variance,
            max: stats.max,
            min: stats.min,
            device_id,
        }
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            mean: self.mean,
            variance: self.variance,
            max: self.max,
            min: self.min,
        }
    }
}

/// Computes mean, population variance (divisor `N`), max and min of `values`.
///
/// The variance is computed in a second pass around the mean, so it can never
/// come out negative.
pub fn aggregate(values: &[f64]) -> Result<Statistics> {
    if values.is_empty() {
        return Err(TelemetryError::EmptyWindow);
    }
    let n = values.len() as f64;

    let mut sum = 0.0;
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for &v in values {
        sum += v;
        max = max.max(v);
        min = min.min(v);
    }
    let mean = sum / n;

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Ok(Statistics {
        mean,
        variance,
        max,
        min,
    })
}
