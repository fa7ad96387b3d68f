//! Dynamically typed cell values read from and written to snapshots.

use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Cell {
    /// Interprets a command-line literal: integers, then reals, then `null`,
    /// otherwise text.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Integer(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Self::Real(f);
            }
        }
        if trimmed.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        Self::Text(raw.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }

    /// Key form used to match rows across scenarios. Integers key exactly; a
    /// real keys as an integer only when it is whole and within `i64` range.
    pub fn match_key(&self) -> String {
        match self {
            Self::Null => "\0null".to_string(),
            Self::Integer(i) => format!("n:{i}"),
            Self::Real(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                format!("n:{}", *f as i64)
            }
            Self::Real(f) => format!("r:{f}"),
            Self::Text(t) => format!("t:{t}"),
            Self::Blob(b) => format!("b:{b:?}"),
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(i) => Self::Integer(i),
            Value::Real(f) => Self::Real(f),
            Value::Text(t) => Self::Text(t),
            Value::Blob(b) => Self::Blob(b),
        }
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(t) => f.write_str(t),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(Cell::parse_literal("7000"), Cell::Integer(7000));
        assert_eq!(Cell::parse_literal("2.5"), Cell::Real(2.5));
        assert_eq!(Cell::parse_literal("NULL"), Cell::Null);
        assert_eq!(Cell::parse_literal("London"), Cell::Text("London".into()));
        assert_eq!(Cell::parse_literal("inf"), Cell::Text("inf".into()));
    }

    #[test]
    fn numeric_keys_unify_integer_and_real() {
        assert_eq!(Cell::Integer(3).match_key(), Cell::Real(3.0).match_key());
        assert_ne!(Cell::Integer(3).match_key(), Cell::Text("3".into()).match_key());
        assert_ne!(Cell::Integer(3).match_key(), Cell::Real(3.5).match_key());
    }

    #[test]
    fn large_integers_keep_distinct_keys() {
        let big = 1_i64 << 53;
        assert_ne!(Cell::Integer(big).match_key(), Cell::Integer(big + 1).match_key());
        assert_ne!(Cell::Integer(i64::MAX).match_key(), Cell::Integer(i64::MAX - 1).match_key());
        assert_eq!(Cell::Real(big as f64).match_key(), Cell::Integer(big).match_key());
        assert_ne!(Cell::Real(f64::INFINITY).match_key(), Cell::Integer(i64::MAX).match_key());
    }
}
