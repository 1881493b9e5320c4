//! Admin console connection over the PostgreSQL wire protocol.
//!
//! Holds at most one client. The connection is opened lazily, recycled once
//! it outlives `max_lifetime`, and dropped after a failed cycle so the next
//! cycle starts from a fresh session.

use std::error::Error;
use std::time::Instant;

use native_tls::TlsConnector;
use postgres::fallible_iterator::FallibleIterator;
use postgres::types::{FromSql, ToSql, Type};
use postgres::{Client, NoTls, Row, RowIter, SimpleQueryMessage, SimpleQueryRow};
use postgres_native_tls::MakeTlsConnector;
use tracing::{debug, info, warn};

use crate::config::{AddressSanitizer, ConnectionSettings};
use crate::metric::ColumnValue;

use super::pass::LABEL_COLUMNS;
use super::scanner::{AdminConnection, ResultCursor};
use super::{CollectError, GatherSummary, format_postgres_error};

/// Wire protocol used for admin queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryProtocol {
    /// Plain `Query` messages. Values arrive as text and are typed by
    /// `decode_text`. The admin console accepts only this protocol.
    #[default]
    Simple,
    /// Prepared statements with decoding by wire type.
    Extended,
}

/// Connection to the pooler's admin console.
pub struct ProxyConnection {
    settings: ConnectionSettings,
    protocol: QueryProtocol,
    client: Option<Client>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl ProxyConnection {
    pub fn new(settings: ConnectionSettings, protocol: QueryProtocol) -> Self {
        Self {
            settings,
            protocol,
            client: None,
            connected_at: None,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Returns the last connection or query error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Attempts to connect. Useful for startup checks.
    pub fn try_connect(&mut self) -> Result<(), CollectError> {
        self.ensure_connected().map(|_| ())
    }

    /// Applies the idle policy once a cycle is over.
    ///
    /// A failed cycle always closes the connection.
    pub fn finish_cycle(&mut self, result: &Result<GatherSummary, CollectError>) {
        match result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                self.last_error = Some(e.to_string());
                if self.client.take().is_some() {
                    debug!("closing admin connection after failed cycle");
                }
            }
        }
        if self.settings.max_idle == 0 && self.client.take().is_some() {
            debug!("closing idle admin connection (max_idle=0)");
        }
    }

    fn lifetime_expired(&self) -> bool {
        let max = self.settings.max_lifetime;
        !max.is_zero() && self.connected_at.is_some_and(|t| t.elapsed() >= max)
    }

    fn ensure_connected(&mut self) -> Result<&mut Client, CollectError> {
        if let Some(client) = &self.client {
            if client.is_closed() {
                warn!("admin connection closed by server, reconnecting");
                self.client = None;
            } else if self.lifetime_expired() {
                debug!("admin connection reached max_lifetime, reconnecting");
                self.client = None;
            }
        }

        if self.client.is_none() {
            match self.connect() {
                Ok(client) => {
                    let target = self
                        .settings
                        .sanitized_address()
                        .unwrap_or_else(|_| "admin console".to_string());
                    info!("connected to {}", target);
                    self.client = Some(client);
                    self.connected_at = Some(Instant::now());
                    self.last_error = None;
                }
                Err(e) => {
                    self.last_error = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        self.client
            .as_mut()
            .ok_or_else(|| CollectError::Connection("not connected".to_string()))
    }

    fn connect(&self) -> Result<Client, CollectError> {
        let config = self.settings.parse_address()?;
        let result = if self.settings.wants_tls()? {
            let connector = TlsConnector::builder()
                .build()
                .map_err(|e| CollectError::Connection(format!("TLS setup failed: {}", e)))?;
            config.connect(MakeTlsConnector::new(connector))
        } else {
            config.connect(NoTls)
        };
        result.map_err(|e| CollectError::Connection(format_postgres_error(&e)))
    }
}

impl AdminConnection for ProxyConnection {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn ResultCursor + 'a>, CollectError> {
        let protocol = self.protocol;
        let client = self.ensure_connected()?;
        let query_error = |e: postgres::Error| CollectError::Query(format_postgres_error(&e));

        match protocol {
            QueryProtocol::Extended => {
                let statement = client.prepare(sql).map_err(query_error)?;
                let columns = statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
                let rows = client
                    .query_raw(&statement, std::iter::empty::<&dyn ToSql>())
                    .map_err(query_error)?;
                Ok(Box::new(ExtendedCursor { columns, rows }))
            }
            QueryProtocol::Simple => {
                let mut columns = Vec::new();
                let mut rows = Vec::new();
                for message in client.simple_query(sql).map_err(query_error)? {
                    match message {
                        SimpleQueryMessage::RowDescription(description) => {
                            columns = description
                                .iter()
                                .map(|c| c.name().to_string())
                                .collect();
                        }
                        SimpleQueryMessage::Row(row) => {
                            if columns.is_empty() {
                                columns =
                                    row.columns().iter().map(|c| c.name().to_string()).collect();
                            }
                            rows.push(row);
                        }
                        _ => {}
                    }
                }
                Ok(Box::new(SimpleCursor {
                    columns,
                    rows: rows.into_iter(),
                }))
            }
        }
    }
}

/// Streams rows of a prepared statement. Dropping it releases the portal.
struct ExtendedCursor<'a> {
    columns: Vec<String>,
    rows: RowIter<'a>,
}

impl ResultCursor for ExtendedCursor<'_> {
    fn columns(&mut self) -> Result<Vec<String>, CollectError> {
        Ok(self.columns.clone())
    }

    fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>, CollectError> {
        match self.rows.next() {
            Ok(Some(row)) => decode_row(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(CollectError::Query(format_postgres_error(&e))),
        }
    }
}

/// Rows of a simple query, already fully received.
struct SimpleCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<SimpleQueryRow>,
}

impl ResultCursor for SimpleCursor {
    fn columns(&mut self) -> Result<Vec<String>, CollectError> {
        Ok(self.columns.clone())
    }

    fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>, CollectError> {
        let Some(row) = self.rows.next() else {
            return Ok(None);
        };
        if row.len() != self.columns.len() {
            return Err(CollectError::Decode(format!(
                "expected {} values, got {}",
                self.columns.len(),
                row.len()
            )));
        }
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, column)| match row.try_get(idx) {
                Ok(text) => Ok(decode_text(column, text)),
                Err(e) => Err(CollectError::Decode(format!("column {}: {}", column, e))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

/// Types a text-format value.
///
/// SQL NULL becomes `Null`. Outside [`LABEL_COLUMNS`], base-10 integers
/// become `Int64` and decimal numbers `Float64`; everything else stays text.
pub(crate) fn decode_text(column: &str, text: Option<&str>) -> ColumnValue {
    let Some(text) = text else {
        return ColumnValue::Null;
    };
    if LABEL_COLUMNS.iter().any(|c| *c == column) {
        return ColumnValue::String(text.to_string());
    }
    if let Ok(n) = text.parse::<i64>() {
        return ColumnValue::Int64(n);
    }
    if looks_decimal(text)
        && let Ok(f) = text.parse::<f64>()
        && f.is_finite()
    {
        return ColumnValue::Float64(f);
    }
    ColumnValue::String(text.to_string())
}

/// Digits with an optional sign, point and exponent. Rules out `inf` and `NaN`.
fn looks_decimal(text: &str) -> bool {
    text.bytes().any(|b| b.is_ascii_digit())
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
}

/// Undecoded column bytes. Read as `Option<RawValue>` so SQL NULL is `None`.
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawValue(raw))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn decode_row(row: &Row) -> Result<Vec<ColumnValue>, CollectError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let raw = row
                .try_get::<_, Option<RawValue>>(idx)
                .map_err(|e| CollectError::Decode(format!("column {}: {}", column.name(), e)))?;
            decode_value(column.name(), column.type_(), raw.map(|r| r.0))
        })
        .collect()
}

fn is_supported(ty: &Type) -> bool {
    [
        Type::INT8,
        Type::INT4,
        Type::INT2,
        Type::OID,
        Type::FLOAT8,
        Type::FLOAT4,
        Type::BOOL,
    ]
    .contains(ty)
        || <String as FromSql>::accepts(ty)
}

/// Decodes one binary-format value by its wire type.
///
/// Integer types widen to `Int64`, float types to `Float64`, text-like types
/// become `String` and SQL NULL becomes `Null`. Any other type is a decode
/// error, null or not.
pub(crate) fn decode_value(
    column: &str,
    ty: &Type,
    raw: Option<&[u8]>,
) -> Result<ColumnValue, CollectError> {
    if !is_supported(ty) {
        return Err(CollectError::Decode(format!(
            "column {}: unsupported type {}",
            column, ty
        )));
    }
    let Some(raw) = raw else {
        return Ok(ColumnValue::Null);
    };
    let invalid =
        |e: Box<dyn Error + Sync + Send>| CollectError::Decode(format!("column {}: {}", column, e));

    let value = if *ty == Type::INT8 {
        ColumnValue::Int64(i64::from_sql(ty, raw).map_err(invalid)?)
    } else if *ty == Type::INT4 {
        ColumnValue::Int64(i64::from(i32::from_sql(ty, raw).map_err(invalid)?))
    } else if *ty == Type::INT2 {
        ColumnValue::Int64(i64::from(i16::from_sql(ty, raw).map_err(invalid)?))
    } else if *ty == Type::OID {
        ColumnValue::Int64(i64::from(u32::from_sql(ty, raw).map_err(invalid)?))
    } else if *ty == Type::FLOAT8 {
        ColumnValue::Float64(f64::from_sql(ty, raw).map_err(invalid)?)
    } else if *ty == Type::FLOAT4 {
        ColumnValue::Float64(f64::from(f32::from_sql(ty, raw).map_err(invalid)?))
    } else if *ty == Type::BOOL {
        ColumnValue::Bool(bool::from_sql(ty, raw).map_err(invalid)?)
    } else {
        ColumnValue::String(String::from_sql(ty, raw).map_err(invalid)?)
    };
    Ok(value)
}
