use serde_json::Value;

use super::{ConvertError, ConverterRegistry, TypeConverter};
use crate::value::{Interval, NativeValue};

/// Renders intervals the way `psql` users read them: `"2 days 03:45:12.000000"`.
pub struct IntervalConverter;

impl TypeConverter for IntervalConverter {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn can_handle(&self, value: &NativeValue) -> bool {
        matches!(value, NativeValue::Interval(_))
    }

    fn convert(&self, value: &NativeValue, _: &ConverterRegistry) -> Result<Value, ConvertError> {
        match value {
            NativeValue::Interval(iv) => Ok(Value::String(format_interval(iv))),
            other => Err(ConvertError::unsupported(self.name(), other)),
        }
    }
}

/// Zero calendar units are omitted; the clock part appears when any clock
/// unit is non-zero or nothing else was written.
pub fn format_interval(iv: &Interval) -> String {
    let mut out = String::new();
    push_unit(&mut out, iv.years, "year", "years");
    push_unit(&mut out, iv.months, "mon", "mons");
    push_unit(&mut out, iv.days, "day", "days");

    if iv.hours != 0 || iv.minutes != 0 || iv.seconds != 0.0 || out.is_empty() {
        out.push_str(&format!("{:02}:{:02}:{:09.6}", iv.hours, iv.minutes, iv.seconds));
    }
    out.trim().to_string()
}

fn push_unit(out: &mut String, amount: i32, singular: &str, plural: &str) {
    if amount != 0 {
        let unit = if amount == 1 { singular } else { plural };
        out.push_str(&format!("{} {} ", amount, unit));
    }
}
