//! Named value conversions for managed-bean metrics.
//!
//! The layout references conversions by key instead of embedding
//! expressions; evaluating arbitrary expressions from configuration is a
//! security liability and is rejected at validation time.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("unknown conversion \"{0}\"")]
    Unknown(String),

    #[error("conversion \"{name}\" expects a numeric value, got {value}")]
    NotNumeric { name: String, value: Value },
}

/// Conversion registry keys accepted in mbean specs.
pub const KNOWN_CONVERSIONS: &[&str] = &["percent", "millis_to_seconds", "millis_to_datetime"];

/// Whether `name` refers to a registered conversion.
pub fn is_known(name: &str) -> bool {
    KNOWN_CONVERSIONS.contains(&name)
}

/// Interpret a java milliseconds-since-epoch timestamp.
pub fn java_timestamp(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Apply a named conversion to a raw metric value.
pub fn convert(name: &str, value: &Value) -> Result<Value, ConversionError> {
    let number = value.as_f64().ok_or_else(|| ConversionError::NotNumeric {
        name: name.to_string(),
        value: value.clone(),
    });

    match name {
        "percent" => Ok(Value::from(number? * 100.0)),
        "millis_to_seconds" => Ok(Value::from(number? / 1000.0)),
        "millis_to_datetime" => {
            #[allow(clippy::cast_possible_truncation)]
            let millis = number? as i64;
            match java_timestamp(millis) {
                Some(ts) => Ok(Value::from(ts.to_rfc3339())),
                None => Err(ConversionError::NotNumeric {
                    name: name.to_string(),
                    value: value.clone(),
                }),
            }
        }
        other => Err(ConversionError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_percent() {
        assert_eq!(convert("percent", &json!(0.25)).unwrap(), json!(25.0));
    }

    #[test]
    fn test_millis_to_seconds() {
        assert_eq!(convert("millis_to_seconds", &json!(1500)).unwrap(), json!(1.5));
    }

    #[test]
    fn test_millis_to_datetime() {
        let converted = convert("millis_to_datetime", &json!(0)).unwrap();
        assert_eq!(converted, json!("1970-01-01T00:00:00+00:00"));
    }

    #[test]
    fn test_unknown_conversion_rejected() {
        assert!(matches!(
            convert("x*100", &json!(1)),
            Err(ConversionError::Unknown(_))
        ));
    }

    #[test]
    fn test_non_numeric_rejected() {
        assert!(matches!(
            convert("percent", &json!("high")),
            Err(ConversionError::NotNumeric { .. })
        ));
    }

    #[test]
    fn test_java_timestamp_carries_millis() {
        let ts = java_timestamp(1_500).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_500);
    }
}
