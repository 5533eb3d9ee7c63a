use crate::measure::latency_measurer::LatencyMeasurer;
use crate::stage::{OutputCollector, Stage};
use spdlog::info;
use std::marker::PhantomData;

/// Measures how long an inner stage (and everything it pushes to) takes per
/// item. Stats are logged every `report_interval` items and once more when the
/// stage is dropped.
pub struct Latency<In, Out, S> {
    name: String,
    report_interval: usize,
    stage: S,
    measurer: LatencyMeasurer,
    count: usize,
    _phantom: PhantomData<fn(In) -> Out>,
}

impl<In, Out, S> Latency<In, Out, S>
where
    S: Stage<In, Out>,
{
    pub fn new(
        name: impl Into<String>,
        report_interval: usize,
        sample_rate: u64,
        stage: S,
    ) -> Self {
        assert!(report_interval > 0, "report_interval must be greater than 0");
        Latency {
            name: name.into(),
            report_interval,
            stage,
            measurer: LatencyMeasurer::new(sample_rate),
            count: 0,
            _phantom: PhantomData,
        }
    }

    pub fn measurer(&self) -> &LatencyMeasurer {
        &self.measurer
    }

    pub fn inner(&self) -> &S {
        &self.stage
    }
}

impl<In, Out, S> Stage<In, Out> for Latency<In, Out, S>
where
    S: Stage<In, Out>,
{
    #[inline(always)]
    fn process<C>(&mut self, data: In, collector: &mut C)
    where
        C: OutputCollector<Out>,
    {
        {
            let _guard = self.measurer.measure_with_guard();
            self.stage.process(data, collector);
        }
        self.count += 1;
        if self.count.is_multiple_of(self.report_interval) {
            self.report("latency");
        }
    }
}

impl<In, Out, S> Latency<In, Out, S> {
    fn has_samples(&self) -> bool {
        self.measurer.sample_count() > 0
    }

    fn report(&self, label: &str) {
        info!(
            "[{}] {} after {} readings: {}",
            self.name,
            label,
            self.count,
            self.measurer.format_stats()
        );
    }
}

impl<In, Out, S> Drop for Latency<In, Out, S> {
    fn drop(&mut self) {
        if self.has_samples() {
            self.report("final latency");
        }
    }
}

pub fn latency<In, Out, S>(
    name: impl Into<String>,
    report_interval: usize,
    sample_rate: u64,
    stage: S,
) -> Latency<In, Out, S>
where
    S: Stage<In, Out>,
{
    Latency::new(name, report_interval, sample_rate, stage)
}
