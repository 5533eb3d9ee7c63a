use crate::aggregator::AggregationResult;
use crate::error::{Result, TelemetryError};
use crate::reading::{DeviceId, Reading};
use std::fmt::Write;

/// Formats `"<deviceID> <mean> <variance> <max> <min>"` with three decimals.
pub fn encode_result(result: &AggregationResult) -> String {
    let mut out = String::with_capacity(48);
    encode_result_into(result, &mut out);
    out
}

/// Like [`encode_result`], reusing `out`.
pub fn encode_result_into(result: &AggregationResult, out: &mut String) {
    out.clear();
    // Writing into a String cannot fail.
    let _ = write!(
        out,
        "{} {:.3} {:.3} {:.3} {:.3}",
        result.device_id, result.mean, result.variance, result.max, result.min
    );
}

/// Parses a record produced by [`encode_result`].
pub fn decode_result(raw: &str) -> Result<AggregationResult> {
    let mut fields = raw.split(' ');
    let device_id: DeviceId = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| TelemetryError::malformed(raw, "device id is not an integer"))?;

    let mut stats = [0.0f64; 4];
    for slot in stats.iter_mut() {
        *slot = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| TelemetryError::malformed(raw, "statistic is not a number"))?;
    }
    if fields.next().is_some() {
        return Err(TelemetryError::malformed(raw, "trailing fields"));
    }

    let [mean, variance, max, min] = stats;
    Ok(AggregationResult {
        mean,
        variance,
        max,
        min,
        device_id,
    })
}

/// Formats an inbound `"<value> <deviceID>"` record.
pub fn encode_reading(reading: &Reading) -> String {
    format!("{:.3} {}", reading.value, reading.device_id)
}
