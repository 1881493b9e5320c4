//! Normalized time-series metric model.
//!
//! A [`Metric`] is a named measurement carrying string tags and typed
//! fields. Values read from the proxy are kept as [`ColumnValue`] until
//! they are either turned into tags or coerced into fields.

mod sink;

use std::collections::BTreeMap;

use serde::Serialize;

pub use sink::{JsonLinesSink, MemorySink, MetricSink};

/// Dynamically-typed scalar decoded from one result column.
///
/// Serializes untagged, so a JSON sink sees plain numbers, strings,
/// booleans and `null`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Int64(i64),
    Float64(f64),
    String(String),
    Bool(bool),
    Null,
}

impl ColumnValue {
    /// Returns the string payload, if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ColumnValue::Int64(_) => "int64",
            ColumnValue::Float64(_) => "float64",
            ColumnValue::String(_) => "string",
            ColumnValue::Bool(_) => "bool",
            ColumnValue::Null => "null",
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Int64(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float64(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Bool(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}

/// Tag key to tag value. Ordered so that output is deterministic.
pub type TagSet = BTreeMap<String, String>;

/// Field key (the column name) to field value.
pub type FieldSet = BTreeMap<String, ColumnValue>;

/// One measurement record: name, tags and fields.
///
/// Immutable once built; sinks take ownership.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    name: String,
    tags: TagSet,
    fields: FieldSet,
}

impl Metric {
    pub(crate) fn new(name: impl Into<String>, tags: TagSet, fields: FieldSet) -> Self {
        Self {
            name: name.into(),
            tags,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Looks up a single tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Looks up a single field.
    pub fn field(&self, key: &str) -> Option<&ColumnValue> {
        self.fields.get(key)
    }
}
