//! Odyssey admin console collector.
//!
//! Issues `SHOW STATS` and `SHOW POOLS` against the pooler and maps each
//! self-describing result row onto a [`Metric`](crate::metric::Metric).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      OdysseyCollector                        │
//! │   for each pass (SHOW STATS → odyssey, SHOW POOLS → pools)   │
//! │                                                              │
//! │  ┌──────────┐   ┌────────────┐   ┌─────────┐   ┌─────────┐   │
//! │  │ scanner  │──▶│ classifier │──▶│ coercer │──▶│ emitter │───┼──▶ MetricSink
//! │  └────┬─────┘   └────────────┘   └─────────┘   └─────────┘   │
//! └───────┼──────────────────────────────────────────────────────┘
//!         │
//!  ┌──────▼──────────┐
//!  │ AdminConnection │ (trait)
//!  └──────┬──────────┘
//!         ├──────────────────────┐
//!  ┌──────▼──────────┐   ┌───────▼────────┐
//!  │ ProxyConnection │   │ MockConnection │
//!  │ (postgres)      │   │ (testing)      │
//!  └─────────────────┘   └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use odystat::collector::{IgnoreSet, OdysseyCollector, ProxyConnection, QueryProtocol};
//! use odystat::config::ConnectionSettings;
//! use odystat::metric::MemorySink;
//!
//! let settings = ConnectionSettings::default();
//! let mut conn = ProxyConnection::new(settings.clone(), QueryProtocol::default());
//! let ignore = IgnoreSet::default();
//! let collector = OdysseyCollector::new(&ignore);
//! let mut sink = MemorySink::new();
//! collector.gather(&mut conn, &settings, &mut sink)?;
//! ```

mod classify;
mod coerce;
#[allow(clippy::module_inception)]
mod collector;
mod emit;
pub mod mock;
mod pass;
mod proxy;
mod scanner;

use crate::config::ConfigError;

pub use classify::{Classified, classify};
pub use coerce::coerce;
pub use collector::{GatherSummary, OdysseyCollector, PassSummary};
pub use emit::Emitter;
pub use pass::{
    Coercion, DEFAULT_IGNORED_COLUMNS, IgnoreSet, LABEL_COLUMNS, POOLS_PASS, PassConfig,
    STATS_PASS,
};
pub use proxy::{ProxyConnection, QueryProtocol};
pub use scanner::{AdminConnection, ResultCursor, ResultRow, scan};

/// Error type for a collection cycle.
///
/// Every variant is fatal to the cycle that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// Could not establish a connection to the pooler.
    Connection(String),
    /// Query execution or row advancement failed.
    Query(String),
    /// Column discovery failed or returned an unusable column list.
    Schema(String),
    /// A row could not be decoded.
    Decode(String),
    /// A string field could not be parsed as a signed 64-bit integer.
    Coercion { column: String, value: String },
    /// Invalid configuration (address sanitizing, pool sizing).
    Config(ConfigError),
    /// A metric was emitted without a measurement name.
    EmptyMeasurement,
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Connection(msg) => write!(f, "odyssey: {}", msg),
            CollectError::Query(msg) => write!(f, "odyssey query error: {}", msg),
            CollectError::Schema(msg) => write!(f, "odyssey schema error: {}", msg),
            CollectError::Decode(msg) => write!(f, "odyssey decode error: {}", msg),
            CollectError::Coercion { column, value } => write!(
                f,
                "odyssey: column {} value {:?} is not a 64-bit integer",
                column, value
            ),
            CollectError::Config(e) => write!(f, "odyssey: {}", e),
            CollectError::EmptyMeasurement => write!(f, "odyssey: empty measurement name"),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CollectError {
    fn from(e: ConfigError) -> Self {
        CollectError::Config(e)
    }
}

/// Formats a driver error for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else {
            msg
        }
    }
}
