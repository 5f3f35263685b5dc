//! Conversion between wire JSON values and stored SQLite values.
//!
//! Input is lenient: numbers may arrive as strings, booleans as 0/1, dates
//! with or without a time part. Blank strings count as absent. Output is
//! strict: timestamps are always RFC 3339 with milliseconds in UTC.

use crate::error::{CoreError, CoreResult};
use crate::registry::{ColumnDefault, ColumnSpec, ColumnType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use farmsync_protocol::{Row, Watermark};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

/// Returns the first present, non-blank value among `name` and its aliases.
pub fn lookup<'r>(row: &'r Row, name: &str, aliases: &[&str]) -> Option<&'r Value> {
    std::iter::once(name)
        .chain(aliases.iter().copied())
        .filter_map(|key| row.get(key))
        .find(|value| !is_blank(value))
}

/// Returns true for `null` and whitespace-only strings.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

/// Converts the incoming value of a data column, falling back to its default.
pub fn column_to_sql(
    column: &ColumnSpec,
    raw: Option<&Value>,
    stamp: Watermark,
) -> CoreResult<SqlValue> {
    match raw.filter(|value| !is_blank(value)) {
        Some(value) => convert(column.name, column.ty, value),
        None => Ok(default_value(column.default, stamp)),
    }
}

fn default_value(default: Option<ColumnDefault>, stamp: Watermark) -> SqlValue {
    match default {
        None => SqlValue::Null,
        Some(ColumnDefault::Text(text)) => SqlValue::Text(text.to_string()),
        Some(ColumnDefault::Integer(value)) => SqlValue::Integer(value),
        Some(ColumnDefault::Real(value)) => SqlValue::Real(value),
        Some(ColumnDefault::Bool(value)) => SqlValue::Integer(i64::from(value)),
        Some(ColumnDefault::Now) => SqlValue::Integer(stamp.as_millis()),
    }
}

fn mismatch(column: &str, expected: &str, value: &Value) -> CoreError {
    CoreError::validation(format!("{column}: expected {expected}, got {value}"))
}

/// Converts a non-blank JSON value to the storage form of `ty`.
pub fn convert(column: &str, ty: ColumnType, value: &Value) -> CoreResult<SqlValue> {
    match ty {
        ColumnType::Text => match value {
            Value::String(text) => Ok(SqlValue::Text(text.clone())),
            Value::Number(number) => Ok(SqlValue::Text(number.to_string())),
            Value::Bool(flag) => Ok(SqlValue::Text(flag.to_string())),
            _ => Err(mismatch(column, "text", value)),
        },
        ColumnType::Integer => {
            let parsed = match value {
                Value::Number(number) => number.as_i64().or_else(|| {
                    number
                        .as_f64()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| f as i64)
                }),
                Value::String(text) => text.trim().parse::<i64>().ok(),
                Value::Bool(flag) => Some(i64::from(*flag)),
                _ => None,
            };
            parsed
                .map(SqlValue::Integer)
                .ok_or_else(|| mismatch(column, "an integer", value))
        }
        ColumnType::Real => {
            let parsed = match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .filter(|f| f.is_finite())
                .map(SqlValue::Real)
                .ok_or_else(|| mismatch(column, "a number", value))
        }
        ColumnType::Bool => {
            let parsed = match value {
                Value::Bool(flag) => Some(*flag),
                Value::Number(number) => match number.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Some(true),
                    "false" | "0" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            parsed
                .map(|flag| SqlValue::Integer(i64::from(flag)))
                .ok_or_else(|| mismatch(column, "a boolean", value))
        }
        ColumnType::Date => value
            .as_str()
            .and_then(normalize_date)
            .map(SqlValue::Text)
            .ok_or_else(|| mismatch(column, "a date", value)),
        ColumnType::Timestamp => match parse_timestamp(column, Some(value))? {
            Some(millis) => Ok(SqlValue::Integer(millis)),
            None => Ok(SqlValue::Null),
        },
    }
}

/// Parses an optional timestamp field into Unix milliseconds.
///
/// Blank input yields `None`.
pub fn parse_timestamp(column: &str, value: Option<&Value>) -> CoreResult<Option<i64>> {
    let Some(value) = value.filter(|value| !is_blank(value)) else {
        return Ok(None);
    };
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| mismatch(column, "a timestamp", value)),
        Value::String(text) => Watermark::parse(text)
            .map(|wm| Some(wm.as_millis()))
            .map_err(|_| mismatch(column, "a timestamp", value)),
        _ => Err(mismatch(column, "a timestamp", value)),
    }
}

/// Normalizes a date field.
///
/// Bare `YYYY-MM-DD` dates are kept as they are; anything with a time part is
/// rewritten as an RFC 3339 UTC instant.
pub fn normalize_date(text: &str) -> Option<String> {
    let text = text.trim();
    if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() {
        return Some(text.to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| {
            naive
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        })
}

/// Renders a stored value as JSON.
pub fn to_json(ty: ColumnType, value: ValueRef<'_>) -> Value {
    match (ty, value) {
        (_, ValueRef::Null) => Value::Null,
        (ColumnType::Timestamp, ValueRef::Integer(millis)) => timestamp_to_json(Some(millis)),
        (ColumnType::Bool, ValueRef::Integer(flag)) => Value::Bool(flag != 0),
        (_, ValueRef::Integer(number)) => Value::from(number),
        (_, ValueRef::Real(number)) => Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        (_, ValueRef::Text(text)) => Value::String(String::from_utf8_lossy(text).into_owned()),
        (_, ValueRef::Blob(_)) => Value::Null,
    }
}

/// Renders an optional millisecond timestamp as RFC 3339, or `null`.
pub fn timestamp_to_json(millis: Option<i64>) -> Value {
    match millis {
        Some(millis) => Value::String(Watermark::from_millis(millis).to_rfc3339()),
        None => Value::Null,
    }
}
