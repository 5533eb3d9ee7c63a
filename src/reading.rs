use crate::error::{Result, TelemetryError};

pub type DeviceId = i32;

/// A single scalar sample tagged with the device that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub device_id: DeviceId,
}

impl Reading {
    pub fn new(device_id: DeviceId, value: f64) -> Self {
        Self { value, device_id }
    }
}

/// Decodes a `"<value> <deviceID>"` record.
///
/// The record is split at its first space. Both halves must be numeric on
/// their own, so leading, doubled or trailing spaces and extra fields are all
/// rejected. Non-finite values are rejected as well.
pub fn parse_reading(raw: &str) -> Result<Reading> {
    let Some((value, device)) = raw.split_once(' ') else {
        return Err(TelemetryError::malformed(raw, "expected two space-separated fields"));
    };

    let value: f64 = value
        .parse()
        .map_err(|_| TelemetryError::malformed(raw, "value is not a number"))?;
    if !value.is_finite() {
        return Err(TelemetryError::malformed(raw, "value is not finite"));
    }

    let device_id: DeviceId = device
        .parse()
        .map_err(|_| TelemetryError::malformed(raw, "device id is not an integer"))?;

    Ok(Reading::new(device_id, value))
}
