mod encode;
mod latency;
mod parse;
mod progress;

pub use encode::{Encode, encode};
pub use latency::{Latency, latency};
pub use parse::{Parse, parse};
pub use progress::{Progress, progress};
