use serde_json::Value;

use super::{map_key, ConvertError, ConverterRegistry, TypeConverter};
use crate::value::NativeValue;

/// Arrays become JSON arrays; elements are converted through the registry.
pub struct ArrayConverter;

impl TypeConverter for ArrayConverter {
    fn name(&self) -> &'static str {
        "array"
    }

    fn can_handle(&self, value: &NativeValue) -> bool {
        matches!(value, NativeValue::Array(_))
    }

    fn convert(&self, value: &NativeValue, registry: &ConverterRegistry) -> Result<Value, ConvertError> {
        match value {
            NativeValue::Array(items) => Ok(Value::Array(
                items.iter().map(|item| registry.convert(item)).collect(),
            )),
            other => Err(ConvertError::unsupported(self.name(), other)),
        }
    }
}

/// Tuples become JSON arrays and maps become JSON objects, recursively.
pub struct StructConverter;

impl TypeConverter for StructConverter {
    fn name(&self) -> &'static str {
        "struct"
    }

    fn can_handle(&self, value: &NativeValue) -> bool {
        matches!(value, NativeValue::Tuple(_) | NativeValue::Map(_))
    }

    fn convert(&self, value: &NativeValue, registry: &ConverterRegistry) -> Result<Value, ConvertError> {
        match value {
            NativeValue::Tuple(items) => Ok(Value::Array(
                items.iter().map(|item| registry.convert(item)).collect(),
            )),
            NativeValue::Map(entries) => Ok(Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (map_key(k), registry.convert(v)))
                    .collect(),
            )),
            other => Err(ConvertError::unsupported(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Interval;
    use serde_json::json;

    #[test]
    fn nested_arrays_convert_elements() {
        let registry = ConverterRegistry::with_defaults();
        let value = NativeValue::Array(vec![
            NativeValue::Array(vec![NativeValue::Int(1), NativeValue::Null]),
            NativeValue::Array(vec![NativeValue::Interval(Interval {
                seconds: 1.0,
                ..Default::default()
            })]),
        ]);
        assert_eq!(registry.convert(&value), json!([[1, null], ["00:00:01.000000"]]));
    }

    #[test]
    fn map_keys_are_stringified() {
        let registry = ConverterRegistry::with_defaults();
        let value = NativeValue::Map(vec![
            (NativeValue::Text("a".into()), NativeValue::Int(1)),
            (NativeValue::Int(2), NativeValue::Tuple(vec![NativeValue::Bool(false)])),
        ]);
        assert_eq!(registry.convert(&value), json!({ "a": 1, "2": [false] }));
    }
}
