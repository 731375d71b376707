//! Column conversions shared by the collection modules.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use crate::StoreError;

pub(crate) fn ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_ms(idx: usize, raw: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(raw).ok_or_else(|| corrupt(idx, Type::Integer, format!("timestamp {raw}")))
}

/// Decode a text column through one of the `parse` constructors on the
/// model enums.
pub(crate) fn parse_col<T>(
    idx: usize,
    raw: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| corrupt(idx, Type::Text, format!("value '{raw}'")))
}

pub(crate) fn corrupt(idx: usize, ty: Type, what: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(StoreError::Corrupt(what)))
}
