//! Splits a row into tags and field candidates.

use crate::config::AddressSanitizer;
use crate::metric::{ColumnValue, TagSet};

use super::CollectError;
use super::pass::{IgnoreSet, PassConfig};
use super::scanner::ResultRow;

/// `db` tag value when the row has no usable `database` column.
pub const DEFAULT_DB: &str = "postgres";

/// Tags of one row plus the columns left over for fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub tags: TagSet,
    /// Remaining `(column, value)` pairs in column order.
    pub candidates: Vec<(String, ColumnValue)>,
}

/// Classifies `row` for `pass`.
///
/// `server` is asked for the `server` tag on every row; its failure fails the row.
pub fn classify(
    row: ResultRow,
    pass: &PassConfig,
    ignore: &IgnoreSet,
    server: &dyn AddressSanitizer,
) -> Result<Classified, CollectError> {
    let mut tags = TagSet::new();
    tags.insert("server".to_string(), server.sanitized_address()?);

    let db = match row.get("database") {
        Some(ColumnValue::String(name)) if pass.db_tag => name.clone(),
        _ => DEFAULT_DB.to_string(),
    };
    tags.insert("db".to_string(), db);

    for &column in pass.tag_columns {
        if let Some(value) = row.get(column).and_then(ColumnValue::as_str)
            && !value.is_empty()
        {
            tags.insert(column.to_string(), value.to_string());
        }
    }

    let candidates = row
        .into_values()
        .into_iter()
        .filter(|(column, _)| !ignore.contains(column) && !pass.is_tag_source(column))
        .collect();

    Ok(Classified { tags, candidates })
}
