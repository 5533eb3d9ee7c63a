use crate::op_counter::OpCounter;
use crate::reading::{Reading, parse_reading};
use crate::stage::{OutputCollector, Stage};
use spdlog::warn;
use std::sync::Arc;

/// Decodes raw inbound records, logging and dropping the malformed ones.
pub struct Parse {
    ops: Arc<OpCounter>,
}

impl<S: AsRef<str>> Stage<S, Reading> for Parse {
    #[inline(always)]
    fn process<C>(&mut self, raw: S, collector: &mut C)
    where
        C: OutputCollector<Reading>,
    {
        self.ops.record_received();
        match parse_reading(raw.as_ref()) {
            Ok(reading) => collector.push(reading),
            Err(err) => {
                self.ops.record_malformed();
                warn!("Dropping inbound record: {}", err);
            }
        }
    }
}

pub fn parse(ops: Arc<OpCounter>) -> Parse {
    Parse { ops }
}
