//! odystat - Odyssey connection pooler statistics collector.
//!
//! Polls the pooler's admin console (`SHOW STATS`, `SHOW POOLS`) and turns
//! each result row into a tagged metric:
//! - `collector`: row scanning, classification, coercion and the collection cycle
//! - `config`: connection settings and the `server` tag sanitizer
//! - `metric`: metric model and sinks

pub mod collector;
pub mod config;
pub mod metric;
