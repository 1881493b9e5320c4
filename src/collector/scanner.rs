//! Result-set scanning with columns discovered at runtime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::metric::ColumnValue;

use super::CollectError;

/// Executes admin console queries.
pub trait AdminConnection {
    /// Runs `sql` and returns a cursor over its result set.
    ///
    /// The cursor borrows the connection; dropping it releases the result set.
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn ResultCursor + 'a>, CollectError>;
}

/// An open result set.
pub trait ResultCursor {
    /// Column names in result order.
    fn columns(&mut self) -> Result<Vec<String>, CollectError>;

    /// Advances and decodes the next row, one value per column.
    ///
    /// Returns `Ok(None)` once the set is exhausted. An error after the last
    /// row is the end-of-iteration error and fails the whole set.
    fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>, CollectError>;
}

/// One decoded row: ordered column names plus a value per column.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    columns: Arc<[String]>,
    values: HashMap<String, ColumnValue>,
}

impl ResultRow {
    /// Pairs decoded values with the result set's column list.
    pub fn new(columns: Arc<[String]>, values: Vec<ColumnValue>) -> Result<Self, CollectError> {
        if values.len() != columns.len() {
            return Err(CollectError::Decode(format!(
                "expected {} values, got {}",
                columns.len(),
                values.len()
            )));
        }
        let values = columns.iter().cloned().zip(values).collect();
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.values.get(column)
    }

    /// Consumes the row, yielding `(column, value)` in column order.
    pub fn into_values(mut self) -> Vec<(String, ColumnValue)> {
        self.columns
            .iter()
            .filter_map(|name| self.values.remove_entry(name))
            .collect()
    }
}

/// Reads every row of `cursor`, handing each to `on_row`.
///
/// Columns are discovered once per result set. The first error from
/// discovery, decoding or `on_row` stops the scan and is returned.
pub fn scan<F>(cursor: &mut dyn ResultCursor, mut on_row: F) -> Result<usize, CollectError>
where
    F: FnMut(ResultRow) -> Result<(), CollectError>,
{
    let columns: Arc<[String]> = cursor.columns()?.into();

    let mut seen = HashSet::with_capacity(columns.len());
    for name in columns.iter() {
        if !seen.insert(name.as_str()) {
            return Err(CollectError::Schema(format!("duplicate column {}", name)));
        }
    }

    let mut count = 0;
    while let Some(values) = cursor.next_row()? {
        on_row(ResultRow::new(Arc::clone(&columns), values)?)?;
        count += 1;
    }
    Ok(count)
}
