use serde_json::Value;

use super::{ConvertError, ConverterRegistry, TypeConverter};
use crate::value::NativeValue;

/// `json`/`jsonb` cells are returned as their raw text; clients parse them.
pub struct JsonTextConverter;

impl TypeConverter for JsonTextConverter {
    fn name(&self) -> &'static str {
        "json-text"
    }

    fn can_handle(&self, value: &NativeValue) -> bool {
        matches!(value, NativeValue::Json { .. })
    }

    fn convert(&self, value: &NativeValue, _: &ConverterRegistry) -> Result<Value, ConvertError> {
        match value {
            NativeValue::Json { text, .. } => Ok(Value::String(text.clone())),
            other => Err(ConvertError::unsupported(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_raw_payload() {
        let registry = ConverterRegistry::with_defaults();
        let value = NativeValue::Json {
            type_name: "JSONB".into(),
            text: r#"{"a": 1}"#.into(),
        };
        assert_eq!(registry.convert(&value), Value::String(r#"{"a": 1}"#.into()));
    }

    #[test]
    fn without_converter_json_is_parsed() {
        let value = NativeValue::Json {
            type_name: "JSON".into(),
            text: "[1,2]".into(),
        };
        assert_eq!(ConverterRegistry::new().convert(&value), serde_json::json!([1, 2]));
    }
}
