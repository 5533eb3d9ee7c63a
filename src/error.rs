use crate::reading::DeviceId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    /// The inbound record could not be decoded. The record is dropped.
    #[error("malformed record {record:?}: {reason}")]
    MalformedRecord { record: String, reason: &'static str },

    /// A window was asked for more samples than it holds.
    #[error("device {device} holds {available} samples, {requested} requested")]
    InsufficientSamples {
        device: DeviceId,
        requested: usize,
        available: usize,
    },

    #[error("cannot aggregate an empty window")]
    EmptyWindow,

    #[error("failed to publish to topic {topic:?}: {reason}")]
    PublishFailure { topic: String, reason: String },

    #[error("subscription closed")]
    SubscriptionClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TelemetryError {
    pub(crate) fn malformed(record: &str, reason: &'static str) -> Self {
        TelemetryError::MalformedRecord {
            record: record.to_owned(),
            reason,
        }
    }
}
