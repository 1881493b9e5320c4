//! Collection cycle: runs every pass and reports the first failure.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::AddressSanitizer;
use crate::metric::MetricSink;

use super::CollectError;
use super::classify::classify;
use super::coerce::coerce;
use super::emit::Emitter;
use super::pass::{IgnoreSet, POOLS_PASS, PassConfig, STATS_PASS};
use super::scanner::{AdminConnection, scan};

/// Outcome of one successful pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub measurement: &'static str,
    /// Rows read, which is also the number of metrics emitted.
    pub rows: usize,
    pub elapsed: Duration,
}

/// Outcome of one successful collection cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatherSummary {
    pub passes: Vec<PassSummary>,
    pub total: Duration,
}

impl GatherSummary {
    /// Rows read by the pass emitting `measurement`.
    pub fn rows(&self, measurement: &str) -> Option<usize> {
        self.passes
            .iter()
            .find(|p| p.measurement == measurement)
            .map(|p| p.rows)
    }

    pub fn total_rows(&self) -> usize {
        self.passes.iter().map(|p| p.rows).sum()
    }
}

/// Runs the `SHOW STATS` and `SHOW POOLS` passes.
///
/// Holds no state between cycles; the only shared input is the ignore set.
pub struct OdysseyCollector<'a> {
    ignore: &'a IgnoreSet,
    passes: Vec<PassConfig>,
}

impl<'a> OdysseyCollector<'a> {
    pub fn new(ignore: &'a IgnoreSet) -> Self {
        Self {
            ignore,
            passes: vec![STATS_PASS, POOLS_PASS],
        }
    }

    /// Replaces the pass list.
    pub fn with_passes(mut self, passes: Vec<PassConfig>) -> Self {
        self.passes = passes;
        self
    }

    /// Runs one collection cycle.
    ///
    /// Passes run in order. The first error aborts the cycle and is returned
    /// as is; metrics of passes that already completed stay delivered.
    pub fn gather(
        &self,
        conn: &mut dyn AdminConnection,
        server: &dyn AddressSanitizer,
        sink: &mut dyn MetricSink,
    ) -> Result<GatherSummary, CollectError> {
        let start = Instant::now();
        let mut summary = GatherSummary::default();

        for pass in &self.passes {
            summary.passes.push(self.run_pass(pass, conn, server, sink)?);
        }

        summary.total = start.elapsed();
        Ok(summary)
    }

    fn run_pass(
        &self,
        pass: &PassConfig,
        conn: &mut dyn AdminConnection,
        server: &dyn AddressSanitizer,
        sink: &mut dyn MetricSink,
    ) -> Result<PassSummary, CollectError> {
        let start = Instant::now();
        let mut emitter = Emitter::new(pass.measurement);

        // The cursor lives only for this block; it is released on every exit path.
        let rows = {
            let mut cursor = conn.query(pass.query)?;
            scan(cursor.as_mut(), |row| {
                let classified = classify(row, pass, self.ignore, server)?;
                let fields = coerce(classified.candidates, pass.coercion)?;
                emitter.emit(classified.tags, fields)
            })?
        };

        emitter.commit(sink);
        let elapsed = start.elapsed();
        debug!("{}: {} rows in {:?}", pass.query, rows, elapsed);

        Ok(PassSummary {
            measurement: pass.measurement,
            rows,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockConnection, MockResult};
    use crate::collector::pass::Coercion;
    use crate::config::ConfigError;
    use crate::metric::{ColumnValue, MemorySink, Metric};

    struct FixedAddress(&'static str);

    impl AddressSanitizer for FixedAddress {
        fn sanitized_address(&self) -> Result<String, ConfigError> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenAddress;

    impl AddressSanitizer for BrokenAddress {
        fn sanitized_address(&self) -> Result<String, ConfigError> {
            Err(ConfigError::InvalidAddress("missing host".into()))
        }
    }

    const SERVER: FixedAddress = FixedAddress("host=pooler user=console");

    fn stats_result() -> MockResult {
        MockResult::new(&["user", "database", "avg_req", "total_xact_count"])
            .row(vec![
                "bob".into(),
                "app".into(),
                "5".into(),
                ColumnValue::Int64(42),
            ])
    }

    fn pools_result() -> MockResult {
        MockResult::new(&["user", "pool_mode", "database", "cl_active"]).row(vec![
            "bob".into(),
            "transaction".into(),
            "app".into(),
            ColumnValue::Int64(3),
        ])
    }

    fn healthy_connection() -> MockConnection {
        MockConnection::new()
            .with_result("SHOW STATS", stats_result())
            .with_result("SHOW POOLS", pools_result())
    }

    fn gather(
        conn: &mut MockConnection,
        sink: &mut MemorySink,
    ) -> Result<GatherSummary, CollectError> {
        let ignore = IgnoreSet::default();
        OdysseyCollector::new(&ignore).gather(conn, &SERVER, sink)
    }

    #[test]
    fn stats_metric_tags_and_fields() {
        let mut conn = healthy_connection();
        let mut sink = MemorySink::new();
        gather(&mut conn, &mut sink).unwrap();

        let stats: Vec<&Metric> = sink.named("odyssey").collect();
        assert_eq!(stats.len(), 1);
        let metric = stats[0];
        assert_eq!(metric.tags().len(), 2);
        assert_eq!(metric.tag("server"), Some("host=pooler user=console"));
        assert_eq!(metric.tag("db"), Some("app"));
        assert_eq!(metric.fields().len(), 1);
        assert_eq!(metric.field("total_xact_count"), Some(&ColumnValue::Int64(42)));
    }

    #[test]
    fn pools_metric_tags_and_fields() {
        let mut conn = healthy_connection();
        let mut sink = MemorySink::new();
        gather(&mut conn, &mut sink).unwrap();

        let pools: Vec<&Metric> = sink.named("odyssey_pools").collect();
        assert_eq!(pools.len(), 1);
        let metric = pools[0];
        assert_eq!(metric.tags().len(), 4);
        assert_eq!(metric.tag("server"), Some("host=pooler user=console"));
        assert_eq!(metric.tag("db"), Some("app"));
        assert_eq!(metric.tag("user"), Some("bob"));
        assert_eq!(metric.tag("pool_mode"), Some("transaction"));
        assert_eq!(metric.fields().len(), 1);
        assert_eq!(metric.field("cl_active"), Some(&ColumnValue::Int64(3)));
    }

    #[test]
    fn passes_run_in_order_and_release_cursors() {
        let mut conn = healthy_connection();
        let mut sink = MemorySink::new();
        let summary = gather(&mut conn, &mut sink).unwrap();

        assert_eq!(conn.queries(), ["SHOW STATS", "SHOW POOLS"]);
        assert_eq!(conn.released(), 2);
        assert_eq!(summary.rows("odyssey"), Some(1));
        assert_eq!(summary.rows("odyssey_pools"), Some(1));
        assert_eq!(summary.total_rows(), 2);
        let names: Vec<&str> = sink.metrics.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["odyssey", "odyssey_pools"]);
    }

    #[test]
    fn stats_fields_are_always_integers() {
        let mut conn = MockConnection::new()
            .with_result(
                "SHOW STATS",
                MockResult::new(&["database", "total_query_count", "total_wait_time", "ratio"])
                    .row(vec![
                        "app".into(),
                        "100".into(),
                        ColumnValue::Int64(7),
                        ColumnValue::Float64(0.5),
                    ])
                    .row(vec![
                        "web".into(),
                        ColumnValue::Int64(5),
                        "12".into(),
                        ColumnValue::Bool(true),
                    ]),
            )
            .with_result("SHOW POOLS", MockResult::new(&["database"]));
        let mut sink = MemorySink::new();
        gather(&mut conn, &mut sink).unwrap();

        let stats: Vec<&Metric> = sink.named("odyssey").collect();
        assert_eq!(stats.len(), 2);
        for metric in stats {
            assert_eq!(metric.fields().len(), 2);
            assert!(
                metric
                    .fields()
                    .values()
                    .all(|v| matches!(v, ColumnValue::Int64(_)))
            );
        }
    }

    #[test]
    fn unparseable_stats_string_fails_cycle_without_metrics() {
        let mut conn = MockConnection::new()
            .with_result(
                "SHOW STATS",
                MockResult::new(&["database", "total_xact_count", "foo"])
                    .row(vec!["app".into(), ColumnValue::Int64(1), "0".into()])
                    .row(vec!["web".into(), ColumnValue::Int64(2), "abc".into()]),
            )
            .with_result("SHOW POOLS", pools_result());
        let mut sink = MemorySink::new();
        let err = gather(&mut conn, &mut sink).unwrap_err();

        assert_eq!(
            err,
            CollectError::Coercion {
                column: "foo".to_string(),
                value: "abc".to_string(),
            }
        );
        assert!(sink.metrics.is_empty());
        assert_eq!(conn.queries(), ["SHOW STATS"]);
        assert_eq!(conn.released(), 1);
    }

    #[test]
    fn server_tag_present_in_both_passes() {
        let mut conn = MockConnection::new()
            .with_result(
                "SHOW STATS",
                MockResult::new(&["total_xact_count"]).row(vec![ColumnValue::Int64(1)]),
            )
            .with_result(
                "SHOW POOLS",
                MockResult::new(&["cl_active"]).row(vec![ColumnValue::Int64(1)]),
            );
        let mut sink = MemorySink::new();
        gather(&mut conn, &mut sink).unwrap();

        assert_eq!(sink.metrics.len(), 2);
        for metric in &sink.metrics {
            assert_eq!(metric.tag("server"), Some("host=pooler user=console"));
            assert_eq!(metric.tag("db"), Some("postgres"));
        }
    }

    #[test]
    fn pools_fields_pass_through_unchanged() {
        let mut conn = MockConnection::new()
            .with_result("SHOW STATS", MockResult::new(&["database"]))
            .with_result(
                "SHOW POOLS",
                MockResult::new(&["database", "user", "cl_active", "maxwait_us", "paused"]).row(
                    vec![
                        "app".into(),
                        ColumnValue::Null,
                        "3".into(),
                        ColumnValue::Float64(1.5),
                        ColumnValue::Bool(false),
                    ],
                ),
            );
        let mut sink = MemorySink::new();
        gather(&mut conn, &mut sink).unwrap();

        let metric = sink.named("odyssey_pools").next().unwrap();
        assert_eq!(metric.tag("user"), None);
        assert_eq!(metric.field("user"), None);
        assert_eq!(metric.field("cl_active"), Some(&ColumnValue::from("3")));
        assert_eq!(metric.field("maxwait_us"), Some(&ColumnValue::Float64(1.5)));
        assert_eq!(metric.field("paused"), Some(&ColumnValue::Bool(false)));
    }

    #[test]
    fn trailing_error_fails_cycle_after_good_rows() {
        let mut conn = MockConnection::new()
            .with_result("SHOW STATS", stats_result())
            .with_result(
                "SHOW POOLS",
                pools_result().fail_after_rows("server closed the connection"),
            );
        let mut sink = MemorySink::new();
        let err = gather(&mut conn, &mut sink).unwrap_err();

        assert!(matches!(err, CollectError::Query(_)));
        // The stats pass completed before the failure; the pools set reports nothing.
        assert_eq!(sink.named("odyssey").count(), 1);
        assert_eq!(sink.named("odyssey_pools").count(), 0);
        assert_eq!(conn.released(), 2);
    }

    #[test]
    fn query_error_is_propagated_unchanged() {
        let mut conn = MockConnection::new()
            .with_result("SHOW STATS", stats_result())
            .fail_query("SHOW POOLS", "ERROR: unsupported command");
        let mut sink = MemorySink::new();
        let err = gather(&mut conn, &mut sink).unwrap_err();
        assert_eq!(
            err,
            CollectError::Query("ERROR: unsupported command".to_string())
        );
    }

    #[test]
    fn column_discovery_error_is_fatal() {
        let mut conn = MockConnection::new()
            .with_result("SHOW STATS", stats_result().fail_columns("no row description"));
        let mut sink = MemorySink::new();
        let err = gather(&mut conn, &mut sink).unwrap_err();
        assert!(matches!(err, CollectError::Schema(_)));
        assert_eq!(conn.released(), 1);
    }

    #[test]
    fn decode_error_discards_earlier_rows() {
        let mut conn = MockConnection::new().with_result(
            "SHOW STATS",
            MockResult::new(&["database", "total_xact_count"])
                .row(vec!["app".into(), ColumnValue::Int64(1)])
                .row(vec!["web".into(), ColumnValue::Int64(2)])
                .fail_decode_at(1, "invalid int8"),
        );
        let mut sink = MemorySink::new();
        let err = gather(&mut conn, &mut sink).unwrap_err();

        assert!(matches!(err, CollectError::Decode(_)));
        assert!(sink.metrics.is_empty());
        assert_eq!(conn.released(), 1);
    }

    #[test]
    fn sanitizer_failure_fails_cycle() {
        let mut conn = healthy_connection();
        let mut sink = MemorySink::new();
        let ignore = IgnoreSet::default();
        let err = OdysseyCollector::new(&ignore)
            .gather(&mut conn, &BrokenAddress, &mut sink)
            .unwrap_err();

        assert!(matches!(err, CollectError::Config(_)));
        assert!(sink.metrics.is_empty());
    }

    #[test]
    fn empty_result_sets_succeed() {
        let mut conn = MockConnection::new()
            .with_result("SHOW STATS", MockResult::new(&["database"]))
            .with_result("SHOW POOLS", MockResult::new(&[]));
        let mut sink = MemorySink::new();
        let summary = gather(&mut conn, &mut sink).unwrap();
        assert_eq!(summary.total_rows(), 0);
        assert!(sink.metrics.is_empty());
    }

    #[test]
    fn row_with_only_ignored_columns_still_emits() {
        let mut conn = MockConnection::new()
            .with_result(
                "SHOW STATS",
                MockResult::new(&["database", "avg_query"]).row(vec!["app".into(), "9".into()]),
            )
            .with_result("SHOW POOLS", MockResult::new(&[]));
        let mut sink = MemorySink::new();
        gather(&mut conn, &mut sink).unwrap();

        let metric = sink.named("odyssey").next().unwrap();
        assert!(metric.fields().is_empty());
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let ignore = IgnoreSet::default();
        let collector = OdysseyCollector::new(&ignore);

        let mut first = MemorySink::new();
        collector
            .gather(&mut healthy_connection(), &SERVER, &mut first)
            .unwrap();
        let mut second = MemorySink::new();
        collector
            .gather(&mut healthy_connection(), &SERVER, &mut second)
            .unwrap();

        assert_eq!(first.metrics, second.metrics);
    }

    #[test]
    fn custom_pass_list() {
        let ignore = IgnoreSet::new(["database"]);
        let lists = PassConfig {
            query: "SHOW LISTS",
            measurement: "odyssey_lists",
            db_tag: false,
            tag_columns: &[],
            coercion: Coercion::PassThrough,
        };
        let collector = OdysseyCollector::new(&ignore).with_passes(vec![lists]);
        let mut conn = MockConnection::new().with_result(
            "SHOW LISTS",
            MockResult::new(&["list", "items"]).row(vec!["pools".into(), ColumnValue::Int64(2)]),
        );
        let mut sink = MemorySink::new();
        collector.gather(&mut conn, &SERVER, &mut sink).unwrap();

        let metric = sink.named("odyssey_lists").next().unwrap();
        assert_eq!(metric.tag("db"), Some("postgres"));
        assert_eq!(metric.fields().len(), 2);
    }
}
