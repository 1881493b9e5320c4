//! Scripted admin connection for testing collectors without a running pooler.
//!
//! Each query maps to a [`MockResult`] describing its columns, rows and
//! failure points. Cursors count their own release so tests can check that
//! result sets are closed on every path.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::metric::ColumnValue;

use super::CollectError;
use super::scanner::{AdminConnection, ResultCursor};

/// Scripted result set.
#[derive(Debug, Clone, Default)]
pub struct MockResult {
    columns: Vec<String>,
    rows: Vec<Vec<ColumnValue>>,
    column_error: Option<String>,
    decode_error: Option<(usize, String)>,
    trailing_error: Option<String>,
}

impl MockResult {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Appends a row. Values are given in column order.
    pub fn row(mut self, values: Vec<ColumnValue>) -> Self {
        self.rows.push(values);
        self
    }

    /// Makes column discovery fail.
    pub fn fail_columns(mut self, msg: &str) -> Self {
        self.column_error = Some(msg.to_string());
        self
    }

    /// Makes decoding of row `index` fail.
    pub fn fail_decode_at(mut self, index: usize, msg: &str) -> Self {
        self.decode_error = Some((index, msg.to_string()));
        self
    }

    /// Reports an error once every row has been read.
    pub fn fail_after_rows(mut self, msg: &str) -> Self {
        self.trailing_error = Some(msg.to_string());
        self
    }
}

/// Admin connection backed by scripted results.
#[derive(Debug, Default)]
pub struct MockConnection {
    results: HashMap<String, MockResult>,
    query_errors: HashMap<String, String>,
    queries: Vec<String>,
    released: Rc<Cell<usize>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, sql: &str, result: MockResult) -> Self {
        self.results.insert(sql.to_string(), result);
        self
    }

    /// Makes `sql` fail at execution time.
    pub fn fail_query(mut self, sql: &str, msg: &str) -> Self {
        self.query_errors.insert(sql.to_string(), msg.to_string());
        self
    }

    /// Queries executed so far, in order.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Number of cursors dropped so far.
    pub fn released(&self) -> usize {
        self.released.get()
    }
}

impl AdminConnection for MockConnection {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn ResultCursor + 'a>, CollectError> {
        self.queries.push(sql.to_string());

        if let Some(msg) = self.query_errors.get(sql) {
            return Err(CollectError::Query(msg.clone()));
        }
        let result = self
            .results
            .get(sql)
            .cloned()
            .ok_or_else(|| CollectError::Query(format!("unknown query: {}", sql)))?;

        Ok(Box::new(MockCursor {
            result,
            position: 0,
            released: Rc::clone(&self.released),
        }))
    }
}

struct MockCursor {
    result: MockResult,
    position: usize,
    released: Rc<Cell<usize>>,
}

impl ResultCursor for MockCursor {
    fn columns(&mut self) -> Result<Vec<String>, CollectError> {
        match self.result.column_error {
            Some(ref msg) => Err(CollectError::Schema(msg.clone())),
            None => Ok(self.result.columns.clone()),
        }
    }

    fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>, CollectError> {
        let index = self.position;
        let Some(values) = self.result.rows.get(index) else {
            return match self.result.trailing_error {
                Some(ref msg) => Err(CollectError::Query(msg.clone())),
                None => Ok(None),
            };
        };
        self.position += 1;

        if let Some((at, ref msg)) = self.result.decode_error
            && at == index
        {
            return Err(CollectError::Decode(msg.clone()));
        }
        Ok(Some(values.clone()))
    }
}

impl Drop for MockCursor {
    fn drop(&mut self) {
        self.released.set(self.released.get() + 1);
    }
}
