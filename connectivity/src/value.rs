//! Driver-native values.
//!
//! Engines decode every cell into a [`NativeValue`]; the
//! [`ConverterRegistry`](crate::convert::ConverterRegistry) turns those into
//! JSON. Nothing outside the database-access boundary sees engine types.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Decimal(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval(Interval),
    Array(Vec<NativeValue>),
    Tuple(Vec<NativeValue>),
    Map(Vec<(NativeValue, NativeValue)>),
    /// JSON document as sent by the server (`json`, `jsonb`).
    Json { type_name: String, text: String },
    /// A value the engine could not decode into a richer variant.
    Other { type_name: String, text: String },
}

impl NativeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    /// Short tag used in logs and conversion errors.
    pub fn kind(&self) -> &str {
        match self {
            NativeValue::Null => "null",
            NativeValue::Bool(_) => "bool",
            NativeValue::Int(_) => "int",
            NativeValue::UInt(_) => "uint",
            NativeValue::Float(_) => "float",
            NativeValue::Text(_) => "text",
            NativeValue::Bytes(_) => "bytes",
            NativeValue::Uuid(_) => "uuid",
            NativeValue::Decimal(_) => "decimal",
            NativeValue::Date(_) => "date",
            NativeValue::Time(_) => "time",
            NativeValue::Timestamp(_) => "timestamp",
            NativeValue::TimestampTz(_) => "timestamptz",
            NativeValue::Interval(_) => "interval",
            NativeValue::Array(_) => "array",
            NativeValue::Tuple(_) => "tuple",
            NativeValue::Map(_) => "map",
            NativeValue::Json { type_name, .. } | NativeValue::Other { type_name, .. } => type_name,
        }
    }
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Null => f.write_str("null"),
            NativeValue::Bool(v) => write!(f, "{}", v),
            NativeValue::Int(v) => write!(f, "{}", v),
            NativeValue::UInt(v) => write!(f, "{}", v),
            NativeValue::Float(v) => write!(f, "{}", v),
            NativeValue::Text(v) => f.write_str(v),
            NativeValue::Bytes(v) => write!(f, "\\x{}", hex::encode(v)),
            NativeValue::Uuid(v) => write!(f, "{}", v),
            NativeValue::Decimal(v) => write!(f, "{}", v),
            NativeValue::Date(v) => write!(f, "{}", v),
            NativeValue::Time(v) => write!(f, "{}", v),
            NativeValue::Timestamp(v) => write!(f, "{}", v),
            NativeValue::TimestampTz(v) => write!(f, "{}", v.to_rfc3339()),
            NativeValue::Interval(v) => write!(f, "{}", v),
            NativeValue::Array(items) => write_seq(f, items, '{', '}'),
            NativeValue::Tuple(items) => write_seq(f, items, '(', ')'),
            NativeValue::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}=>{}", k, v)?;
                }
                f.write_str("}")
            }
            NativeValue::Json { text, .. } | NativeValue::Other { text, .. } => f.write_str(text),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[NativeValue], open: char, close: char) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "{}", close)
}

/// A calendar interval split into display units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Interval {
    pub years: i32,
    pub months: i32,
    pub days: i32,
    pub hours: i32,
    pub minutes: i32,
    pub seconds: f64,
}

impl Interval {
    const MICROS_PER_HOUR: i64 = 3_600_000_000;
    const MICROS_PER_MINUTE: i64 = 60_000_000;

    /// Builds an interval from the wire representation (months, days, microseconds).
    pub fn from_parts(months: i32, days: i32, microseconds: i64) -> Self {
        let hours = microseconds / Self::MICROS_PER_HOUR;
        let rest = microseconds % Self::MICROS_PER_HOUR;
        let minutes = rest / Self::MICROS_PER_MINUTE;
        let micros = rest % Self::MICROS_PER_MINUTE;
        Self {
            years: months / 12,
            months: months % 12,
            days,
            hours: hours as i32,
            minutes: minutes as i32,
            seconds: micros as f64 / 1_000_000.0,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} years {} mons {} days {} hours {} mins {} secs",
            self.years, self.months, self.days, self.hours, self.minutes, self.seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_from_parts_splits_units() {
        let micros = 3 * 3_600_000_000 + 45 * 60_000_000 + 12_500_000;
        let iv = Interval::from_parts(14, 3, micros);
        assert_eq!(iv.years, 1);
        assert_eq!(iv.months, 2);
        assert_eq!(iv.days, 3);
        assert_eq!(iv.hours, 3);
        assert_eq!(iv.minutes, 45);
        assert!((iv.seconds - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn display_renders_nested_values() {
        let v = NativeValue::Array(vec![NativeValue::Int(1), NativeValue::Null]);
        assert_eq!(v.to_string(), "{1,null}");
        assert_eq!(NativeValue::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
    }
}
