//! Metric assembly and hand-off to the sink.

use crate::metric::{FieldSet, Metric, MetricSink, TagSet};

use super::CollectError;

/// Builds metrics for one result set.
///
/// Metrics are held back until [`commit`](Emitter::commit), so a result set
/// that fails halfway reports nothing.
#[derive(Debug)]
pub struct Emitter {
    measurement: &'static str,
    pending: Vec<Metric>,
}

impl Emitter {
    pub fn new(measurement: &'static str) -> Self {
        Self {
            measurement,
            pending: Vec::new(),
        }
    }

    /// Assembles a metric from one row. Empty field sets are still emitted.
    pub fn emit(&mut self, tags: TagSet, fields: FieldSet) -> Result<(), CollectError> {
        if self.measurement.is_empty() {
            return Err(CollectError::EmptyMeasurement);
        }
        self.pending.push(Metric::new(self.measurement, tags, fields));
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forwards every pending metric to `sink`, in row order.
    pub fn commit(self, sink: &mut dyn MetricSink) -> usize {
        let count = self.pending.len();
        for metric in self.pending {
            sink.add_metric(metric);
        }
        count
    }
}
