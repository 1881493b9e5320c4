//! Destinations for finished metrics.

use std::io::Write;

use serde::Serialize;
use tracing::warn;

use super::{FieldSet, Metric, TagSet};

/// Receives finished metrics.
///
/// Queuing, transport and retry are the sink's business; the collector
/// never learns whether a metric was delivered.
pub trait MetricSink {
    fn add_metric(&mut self, metric: Metric);

    /// Called once at the end of each collection cycle.
    fn flush(&mut self) {}
}

/// Keeps every metric in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub metrics: Vec<Metric>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics with the given measurement name, in arrival order.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Metric> + 'a {
        self.metrics.iter().filter(move |m| m.name() == name)
    }
}

impl MetricSink for MemorySink {
    fn add_metric(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    name: &'a str,
    tags: &'a TagSet,
    fields: &'a FieldSet,
    timestamp: i64,
}

/// Writes one JSON object per line.
///
/// Write failures are logged and counted, never returned.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: u64,
    failed: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            written: 0,
            failed: 0,
        }
    }

    /// Number of metrics successfully written.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Number of metrics dropped because of write or encode errors.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_metric(&mut self, metric: &Metric) -> std::io::Result<()> {
        let record = JsonRecord {
            name: metric.name(),
            tags: metric.tags(),
            fields: metric.fields(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")
    }
}

impl<W: Write> MetricSink for JsonLinesSink<W> {
    fn add_metric(&mut self, metric: Metric) {
        match self.write_metric(&metric) {
            Ok(()) => self.written += 1,
            Err(e) => {
                self.failed += 1;
                warn!("dropping metric {}: {}", metric.name(), e);
            }
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("failed to flush metric output: {}", e);
        }
    }
}
