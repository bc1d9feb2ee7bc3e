use serde_json::Value;

use super::{ConvertError, ConverterRegistry, TypeConverter};
use crate::value::NativeValue;

/// High-precision decimals are sent as plain strings to avoid float rounding.
pub struct DecimalConverter;

impl TypeConverter for DecimalConverter {
    fn name(&self) -> &'static str {
        "decimal"
    }

    fn can_handle(&self, value: &NativeValue) -> bool {
        matches!(value, NativeValue::Decimal(_))
    }

    fn convert(&self, value: &NativeValue, _: &ConverterRegistry) -> Result<Value, ConvertError> {
        match value {
            // `Decimal`'s Display never uses exponent notation.
            NativeValue::Decimal(d) => Ok(Value::String(d.to_string())),
            other => Err(ConvertError::unsupported(self.name(), other)),
        }
    }
}
