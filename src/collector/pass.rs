//! Declarative description of the two collection passes.

use std::collections::HashSet;

/// Columns never emitted as fields.
///
/// Identity columns end up as tags; the `avg_*` rates are left out on purpose.
pub const DEFAULT_IGNORED_COLUMNS: [&str; 7] = [
    "user",
    "database",
    "pool_mode",
    "avg_req",
    "avg_recv",
    "avg_sent",
    "avg_query",
];

/// Columns that name things rather than count them.
///
/// Their values stay text even when they look numeric (a database named `42`).
pub const LABEL_COLUMNS: [&str; 3] = ["user", "database", "pool_mode"];

/// Set of column names excluded from field emission.
///
/// Built once at startup and shared read-only by every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreSet {
    columns: HashSet<String>,
}

impl IgnoreSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_COLUMNS)
    }
}

/// How field candidates are turned into field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Integers pass through, strings must parse as `i64`, other types are dropped.
    IntegersOnly,
    /// Every value passes through unchanged.
    PassThrough,
}

/// One query-and-process phase of a collection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassConfig {
    /// Admin console query to run.
    pub query: &'static str,
    /// Measurement name of the emitted metrics.
    pub measurement: &'static str,
    /// Take the `db` tag from a `database` column when present.
    pub db_tag: bool,
    /// Columns copied into tags of the same name when they hold a non-empty string.
    pub tag_columns: &'static [&'static str],
    pub coercion: Coercion,
}

/// `SHOW STATS`: counters, some of which arrive as strings depending on the server version.
pub const STATS_PASS: PassConfig = PassConfig {
    query: "SHOW STATS",
    measurement: "odyssey",
    db_tag: true,
    tag_columns: &[],
    coercion: Coercion::IntegersOnly,
};

/// `SHOW POOLS`: per user/database pool state.
pub const POOLS_PASS: PassConfig = PassConfig {
    query: "SHOW POOLS",
    measurement: "odyssey_pools",
    db_tag: true,
    tag_columns: &["user", "pool_mode"],
    coercion: Coercion::PassThrough,
};

impl PassConfig {
    /// Whether `column` feeds a tag in this pass.
    pub fn is_tag_source(&self, column: &str) -> bool {
        (self.db_tag && column == "database") || self.tag_columns.iter().any(|c| *c == column)
    }
}
