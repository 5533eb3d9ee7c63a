use crate::stage::{OutputCollector, Stage};
use spdlog::info;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Pass-through stage that logs how fast readings flow through a shard.
///
/// Every `interval` items it logs the rate since the previous report and the
/// rate since the stage was created.
pub struct Progress<T> {
    name: String,
    interval: usize,
    count: usize,
    started: Instant,
    last_report: Instant,
    _phantom: PhantomData<fn(T)>,
}

impl<T> Progress<T> {
    pub fn new(name: impl Into<String>, interval: usize) -> Self {
        assert!(interval > 0, "interval must be greater than 0");
        let now = Instant::now();
        Self {
            name: name.into(),
            interval,
            count: 0,
            started: now,
            last_report: now,
            _phantom: PhantomData,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn report(&mut self) {
        let now = Instant::now();
        let recent = per_second(self.interval, now - self.last_report);
        let overall = per_second(self.count, now - self.started);
        self.last_report = now;

        info!(
            "[{}] {} readings handled ({}/s now, {}/s overall)",
            self.name,
            human_count(self.count as f64),
            human_count(recent),
            human_count(overall)
        );
    }
}

impl<T> Stage<T, T> for Progress<T> {
    #[inline(always)]
    fn process<C>(&mut self, data: T, collector: &mut C)
    where
        C: OutputCollector<T>,
    {
        self.count += 1;
        if self.count.is_multiple_of(self.interval) {
            self.report();
        }
        collector.push(data);
    }
}

pub fn progress<T>(name: impl Into<String>, interval: usize) -> Progress<T> {
    Progress::new(name, interval)
}

fn per_second(items: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { items as f64 / secs } else { 0.0 }
}

fn human_count(val: f64) -> String {
    const UNITS: [(f64, &str); 3] = [(1e9, "b"), (1e6, "m"), (1e3, "k")];
    for (scale, suffix) in UNITS {
        if val >= scale {
            return format!("{:.2}{}", val / scale, suffix);
        }
    }
    if val.fract() == 0.0 {
        format!("{:.0}", val)
    } else {
        format!("{:.2}", val)
    }
}
