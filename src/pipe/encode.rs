use crate::aggregator::AggregationResult;
use crate::encoder::encode_result;
use crate::stage::{OutputCollector, Stage};

/// Turns aggregation results into outbound wire records.
pub struct Encode;

impl Stage<AggregationResult, String> for Encode {
    #[inline(always)]
    fn process<C>(&mut self, result: AggregationResult, collector: &mut C)
    where
        C: OutputCollector<String>,
    {
        collector.push(encode_result(&result));
    }
}

pub fn encode() -> Encode {
    Encode
}
