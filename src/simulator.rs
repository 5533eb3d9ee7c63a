use crate::bus::{DATA_TOPIC, MessageBus};
use crate::encoder::encode_reading;
use crate::error::Result;
use crate::reading::{DeviceId, Reading};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Draws from N(mean, std_dev²) with the Box–Muller transform.
pub fn gaussian(mean: f64, std_dev: f64, rng: &mut impl Rng) -> f64 {
    // (0, 1] keeps ln() finite.
    let u1 = 1.0 - rng.r#gen::<f64>();
    let u2 = rng.r#gen::<f64>();
    let standard = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).sin();
    mean + std_dev * standard
}

/// A synthetic device publishing normally distributed readings.
pub struct DeviceSimulator {
    device_id: DeviceId,
    mean: f64,
    std_dev: f64,
    rng: StdRng,
}

impl DeviceSimulator {
    pub fn new(device_id: DeviceId, mean: f64, std_dev: f64) -> Self {
        Self::with_rng(device_id, mean, std_dev, StdRng::from_entropy())
    }

    pub fn with_seed(device_id: DeviceId, mean: f64, std_dev: f64, seed: u64) -> Self {
        Self::with_rng(device_id, mean, std_dev, StdRng::seed_from_u64(seed))
    }

    fn with_rng(device_id: DeviceId, mean: f64, std_dev: f64, rng: StdRng) -> Self {
        Self {
            device_id,
            mean,
            std_dev,
            rng,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn next_reading(&mut self) -> Reading {
        Reading::new(
            self.device_id,
            gaussian(self.mean, self.std_dev, &mut self.rng),
        )
    }

    /// Publishes up to `points` readings to `DataPoint`, sleeping `interval`
    /// between them, and stops early once `running` is cleared. Returns how
    /// many readings were published.
    pub fn run(
        &mut self,
        bus: &dyn MessageBus,
        points: usize,
        interval: Duration,
        running: &AtomicBool,
    ) -> Result<usize> {
        let mut published = 0;
        while published < points && running.load(Ordering::Relaxed) {
            let reading = self.next_reading();
            bus.publish(DATA_TOPIC, &encode_reading(&reading))?;
            published += 1;
            if !interval.is_zero() {
                thread::sleep(interval);
            }
        }
        Ok(published)
    }
}
