use std::{cmp::Ordering, fmt, str::FromStr};

use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value as SqlValue, ValueRef,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Serialize;
use thiserror::Error;

use crate::schema::SqlType;

/// A typed cell. Monetary and other fractional values are carried as
/// [`Decimal`] and only become floating point when written to a REAL column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Decimal(Decimal),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Total order matching SQLite's: NULL, then numbers, then text.
    pub fn sql_cmp(&self, other: &Self) -> Ordering {
        fn rank(value: &Value) -> u8 {
            match value {
                Value::Null => 0,
                Value::Integer(_) | Value::Decimal(_) => 1,
                Value::Text(_) => 2,
            }
        }
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Integer(a), Value::Decimal(b)) => Decimal::from(*a).cmp(b),
            (Value::Decimal(a), Value::Integer(b)) => a.cmp(&Decimal::from(*b)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{}", d.normalize()),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Decimal(d) => {
                let real = d.to_f64().ok_or_else(|| {
                    rusqlite::Error::ToSqlConversionFailure(
                        format!("Decimal {d} does not fit in a REAL column").into(),
                    )
                })?;
                ToSqlOutput::Owned(SqlValue::Real(real))
            }
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        };
        Ok(output)
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Value::Null),
            ValueRef::Integer(i) => Ok(Value::Integer(i)),
            ValueRef::Real(f) => Decimal::from_f64(f)
                .map(Value::Decimal)
                .ok_or(FromSqlError::InvalidType),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
            }
        }
    }
}

/// How a single raw cell reads when sampled for type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Blank,
    Integer,
    Real,
    Text,
}

pub fn observe(raw: &str) -> Observation {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Observation::Blank
    } else if trimmed.parse::<i64>().is_ok() {
        Observation::Integer
    } else if parse_decimal(trimmed).is_some() {
        Observation::Real
    } else {
        Observation::Text
    }
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot store '{value}' in {expected} column '{column}'")]
pub struct CoercionError {
    pub column: String,
    pub value: String,
    pub expected: SqlType,
}

/// Converts a raw CSV cell into the value stored for a column of type `ty`.
/// Blank cells become NULL regardless of type.
pub fn coerce(column: &str, raw: &str, ty: SqlType) -> Result<Value, CoercionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    let fail = || CoercionError {
        column: column.to_string(),
        value: raw.to_string(),
        expected: ty,
    };
    match ty {
        SqlType::Text => Ok(Value::Text(raw.to_string())),
        SqlType::Integer => trimmed.parse::<i64>().map(Value::Integer).map_err(|_| fail()),
        SqlType::Real => parse_decimal(trimmed).map(Value::Decimal).ok_or_else(fail),
    }
}

/// Lower-cases `name` and collapses every run of characters outside
/// `[a-z0-9]` into a single underscore, trimming underscores at both ends.
pub fn normalize_column_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !normalized.is_empty() {
                normalized.push('_');
            }
            pending_separator = false;
            normalized.push(c);
        } else {
            pending_separator = true;
        }
    }
    normalized
}

/// Wraps an identifier in double quotes for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
