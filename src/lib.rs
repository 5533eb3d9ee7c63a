mod aggregator;
mod bus;
mod coordinator;
mod display;
mod encoder;
mod engine;
mod error;
mod macros;
pub mod measure;
mod op_counter;
mod options;
mod pipe;
mod publisher;
mod reading;
mod service;
mod simulator;
mod stage;
mod window;

pub use crate::aggregator::{AggregationResult, Statistics, aggregate};
pub use crate::bus::{
    DATA_TOPIC, InMemoryBus, MessageBus, RESULT_TOPIC, Subscription, SubscriptionId,
};
pub use crate::coordinator::StreamCoordinator;
pub use crate::display::{DisplaySink, ResultSeries};
pub use crate::encoder::{decode_result, encode_reading, encode_result, encode_result_into};
pub use crate::engine::WorkerEngine;
pub use crate::error::{Result, TelemetryError};
pub use crate::op_counter::{OpCounter, OpStats};
pub use crate::options::EngineOptions;
pub use crate::pipe::*;
pub use crate::publisher::{PublishPolicy, Publisher};
pub use crate::reading::{DeviceId, Reading, parse_reading};
pub use crate::service::{AggregationService, shard_for};
pub use crate::simulator::{DeviceSimulator, gaussian};
pub use crate::stage::{OutputCollector, Pipeline, Stage, StageExt};
pub use crate::window::{DeviceState, DeviceWindow, WindowStore};
