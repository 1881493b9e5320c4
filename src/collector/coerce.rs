//! Field value coercion.

use tracing::trace;

use crate::metric::{ColumnValue, FieldSet};

use super::CollectError;
use super::pass::Coercion;

/// Turns field candidates into a [`FieldSet`].
///
/// With [`Coercion::IntegersOnly`] a string that is not a base-10 `i64`
/// fails the row, while floats, booleans and nulls are silently dropped.
pub fn coerce(
    candidates: Vec<(String, ColumnValue)>,
    coercion: Coercion,
) -> Result<FieldSet, CollectError> {
    let mut fields = FieldSet::new();

    for (column, value) in candidates {
        match coercion {
            Coercion::PassThrough => {
                fields.insert(column, value);
            }
            Coercion::IntegersOnly => match value {
                ColumnValue::Int64(_) => {
                    fields.insert(column, value);
                }
                ColumnValue::String(s) => match s.parse::<i64>() {
                    Ok(n) => {
                        fields.insert(column, ColumnValue::Int64(n));
                    }
                    Err(_) => return Err(CollectError::Coercion { column, value: s }),
                },
                other => trace!("dropping {} field {}", other.kind(), column),
            },
        }
    }

    Ok(fields)
}
