//! Type conversion registry.
//!
//! Converters are consulted in registration order and the first one whose
//! [`TypeConverter::can_handle`] accepts a value converts it. Values nobody
//! claims go through the built-in rules in [`ConverterRegistry::convert_builtin`].
//! A converter that fails degrades to the value's display string, so
//! conversion never fails as a whole.

mod collections;
mod decimal;
mod interval;
mod json;

use std::sync::Arc;

use serde_json::{Number, Value};

use crate::value::NativeValue;

pub use collections::{ArrayConverter, StructConverter};
pub use decimal::DecimalConverter;
pub use interval::{format_interval, IntervalConverter};
pub use json::JsonTextConverter;

/// Byte arrays longer than this are truncated in the hex rendering.
pub const MAX_BYTES_DISPLAY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("{converter} cannot convert a {kind} value")]
    Unsupported { converter: &'static str, kind: String },

    #[error("{converter} failed: {reason}")]
    Failed { converter: &'static str, reason: String },
}

impl ConvertError {
    pub fn unsupported(converter: &'static str, value: &NativeValue) -> Self {
        ConvertError::Unsupported {
            converter,
            kind: value.kind().to_string(),
        }
    }
}

/// A pluggable conversion rule for a subset of native values.
pub trait TypeConverter: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, value: &NativeValue) -> bool;

    /// Converts `value`. Nested values should be converted through `registry`.
    fn convert(&self, value: &NativeValue, registry: &ConverterRegistry) -> Result<Value, ConvertError>;
}

/// Ordered chain of converters, fixed once built.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: Vec<Arc<dyn TypeConverter>>,
}

impl ConverterRegistry {
    /// An empty chain; only the built-in rules apply.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default chain used by the gateway.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(IntervalConverter));
        registry.register(Arc::new(ArrayConverter));
        registry.register(Arc::new(StructConverter));
        registry.register(Arc::new(DecimalConverter));
        registry.register(Arc::new(JsonTextConverter));
        registry
    }

    pub fn register(&mut self, converter: Arc<dyn TypeConverter>) {
        tracing::debug!(converter = converter.name(), "Registered type converter");
        self.converters.push(converter);
    }

    pub fn converter_names(&self) -> Vec<&'static str> {
        self.converters.iter().map(|c| c.name()).collect()
    }

    pub fn convert(&self, value: &NativeValue) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        if let Some(converter) = self.converters.iter().find(|c| c.can_handle(value)) {
            return match converter.convert(value, self) {
                Ok(converted) => converted,
                Err(e) => {
                    tracing::warn!(
                        converter = converter.name(),
                        kind = value.kind(),
                        error = %e,
                        "Type conversion failed, using string form"
                    );
                    Value::String(value.to_string())
                }
            };
        }

        self.convert_builtin(value)
    }

    /// Built-in handling for values no registered converter claims.
    fn convert_builtin(&self, value: &NativeValue) -> Value {
        match value {
            NativeValue::Null => Value::Null,
            NativeValue::Bool(v) => Value::Bool(*v),
            NativeValue::Int(v) => Value::from(*v),
            NativeValue::UInt(v) => Value::from(*v),
            NativeValue::Float(v) => Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(v.to_string())),
            NativeValue::Text(v) => Value::String(v.clone()),
            NativeValue::Bytes(bytes) => Value::String(format_bytes(bytes)),
            NativeValue::Uuid(v) => Value::String(v.to_string()),
            NativeValue::Decimal(v) => Value::String(v.to_string()),
            NativeValue::Date(v) => Value::String(v.format("%Y-%m-%d").to_string()),
            NativeValue::Time(v) => Value::String(v.format("%H:%M:%S%.f").to_string()),
            NativeValue::Timestamp(v) => Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            NativeValue::TimestampTz(v) => Value::String(v.to_rfc3339()),
            NativeValue::Interval(v) => Value::String(v.to_string()),
            NativeValue::Array(items) | NativeValue::Tuple(items) => {
                Value::Array(items.iter().map(|item| self.convert(item)).collect())
            }
            NativeValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (map_key(k), self.convert(v)))
                    .collect(),
            ),
            NativeValue::Json { text, .. } => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
            NativeValue::Other { text, .. } => Value::String(text.clone()),
        }
    }
}

/// Renders bytes as `\x` + lowercase hex, truncated past [`MAX_BYTES_DISPLAY`].
pub fn format_bytes(bytes: &[u8]) -> String {
    if bytes.len() > MAX_BYTES_DISPLAY {
        format!(
            "\\x{}... ({} bytes)",
            hex::encode(&bytes[..MAX_BYTES_DISPLAY]),
            bytes.len()
        )
    } else {
        format!("\\x{}", hex::encode(bytes))
    }
}

/// Object keys must be strings; text keys are used as-is.
pub(crate) fn map_key(key: &NativeValue) -> String {
    match key {
        NativeValue::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct Failing;

    impl TypeConverter for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn can_handle(&self, value: &NativeValue) -> bool {
            matches!(value, NativeValue::Int(_))
        }

        fn convert(&self, value: &NativeValue, _: &ConverterRegistry) -> Result<Value, ConvertError> {
            Err(ConvertError::unsupported(self.name(), value))
        }
    }

    struct Shouting;

    impl TypeConverter for Shouting {
        fn name(&self) -> &'static str {
            "shouting"
        }

        fn can_handle(&self, value: &NativeValue) -> bool {
            matches!(value, NativeValue::Text(_))
        }

        fn convert(&self, value: &NativeValue, _: &ConverterRegistry) -> Result<Value, ConvertError> {
            Ok(Value::String(value.to_string().to_uppercase()))
        }
    }

    #[test]
    fn null_is_never_offered_to_converters() {
        let mut registry = ConverterRegistry::new();
        registry.register(Arc::new(Shouting));
        assert_eq!(registry.convert(&NativeValue::Null), Value::Null);
    }

    #[test]
    fn first_matching_converter_wins() {
        struct Whispering;
        impl TypeConverter for Whispering {
            fn name(&self) -> &'static str {
                "whispering"
            }
            fn can_handle(&self, value: &NativeValue) -> bool {
                matches!(value, NativeValue::Text(_))
            }
            fn convert(&self, value: &NativeValue, _: &ConverterRegistry) -> Result<Value, ConvertError> {
                Ok(Value::String(value.to_string().to_lowercase()))
            }
        }

        let mut registry = ConverterRegistry::new();
        registry.register(Arc::new(Shouting));
        registry.register(Arc::new(Whispering));
        assert_eq!(registry.convert(&NativeValue::Text("Hi".into())), json!("HI"));
    }

    #[test]
    fn failing_converter_degrades_to_string() {
        let mut registry = ConverterRegistry::new();
        registry.register(Arc::new(Failing));
        assert_eq!(registry.convert(&NativeValue::Int(42)), json!("42"));
    }

    #[test]
    fn uuid_becomes_canonical_string() {
        let id = Uuid::parse_str("6f1c0e9a-3b7d-4c55-9f0e-2a1b3c4d5e6f").unwrap();
        let registry = ConverterRegistry::with_defaults();
        assert_eq!(
            registry.convert(&NativeValue::Uuid(id)),
            json!("6f1c0e9a-3b7d-4c55-9f0e-2a1b3c4d5e6f")
        );
    }

    #[test]
    fn short_bytes_are_hex_encoded() {
        let registry = ConverterRegistry::with_defaults();
        assert_eq!(
            registry.convert(&NativeValue::Bytes(vec![0x00, 0xff, 0x10])),
            json!("\\x00ff10")
        );
    }

    #[test]
    fn long_bytes_are_truncated_at_one_hundred() {
        let bytes: Vec<u8> = (0..150u32).map(|i| (i % 256) as u8).collect();
        let registry = ConverterRegistry::with_defaults();
        let Value::String(rendered) = registry.convert(&NativeValue::Bytes(bytes.clone())) else {
            panic!("expected string");
        };
        assert!(rendered.starts_with("\\x"));
        assert!(rendered.ends_with("... (150 bytes)"));
        let hex_part = rendered
            .strip_prefix("\\x")
            .and_then(|s| s.strip_suffix("... (150 bytes)"))
            .unwrap();
        assert_eq!(hex_part.len(), 200);
        assert_eq!(hex_part, hex::encode(&bytes[..100]));
    }

    #[test]
    fn exactly_one_hundred_bytes_are_not_truncated() {
        let rendered = format_bytes(&[0xab; 100]);
        assert_eq!(rendered.len(), 2 + 200);
        assert!(!rendered.contains("bytes"));
    }

    #[test]
    fn scalars_pass_through() {
        let registry = ConverterRegistry::with_defaults();
        assert_eq!(registry.convert(&NativeValue::Int(-7)), json!(-7));
        assert_eq!(registry.convert(&NativeValue::Bool(true)), json!(true));
        assert_eq!(registry.convert(&NativeValue::Float(1.5)), json!(1.5));
        assert_eq!(registry.convert(&NativeValue::Float(f64::NAN)), json!("NaN"));
        assert_eq!(registry.convert(&NativeValue::Text("x".into())), json!("x"));
    }

    #[test]
    fn default_chain_order() {
        assert_eq!(
            ConverterRegistry::with_defaults().converter_names(),
            vec!["interval", "array", "struct", "decimal", "json-text"]
        );
    }
}
