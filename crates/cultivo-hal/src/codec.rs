//! Payload text codec.
//!
//! The rack's firmware speaks plain UTF-8 text on every topic:
//!
//! | Kind | Accepted on decode | Emitted on encode |
//! |---|---|---|
//! | Numeric | `"23.5"`, `" 7 "` (finite only) | `"40"`, `"12.5"` |
//! | Boolean | `1/0`, `true/false`, `on/off` (any case) | `"1"` / `"0"` |
//! | Text | any UTF-8 up to `max_len` bytes | the string itself |
//!
//! Inbound numeric readings are not range-checked: a sensor reporting an
//! out-of-range value is still reporting.  Ranges only bound commands, via
//! [`validate`].

use cultivo_types::{Value, ValueKind};
use thiserror::Error;

/// Why a payload or operator value was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("payload is empty")]
    Empty,

    #[error("'{0}' is not a number")]
    NotNumeric(String),

    #[error("number is not finite")]
    NotFinite,

    #[error("'{0}' is not a boolean")]
    NotBoolean(String),

    #[error("text is {len} bytes, exceeding the limit of {max}")]
    TooLong { len: usize, max: usize },

    #[error("{value} is outside {min}..={max}")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("expected a {expected} value")]
    KindMismatch { expected: &'static str },
}

/// Decode a raw inbound payload according to `kind`.
pub fn decode(kind: &ValueKind, raw: &[u8]) -> Result<Value, CodecError> {
    let text = std::str::from_utf8(raw).map_err(|_| CodecError::NotUtf8)?;
    parse(kind, text)
}

/// Parse a textual value according to `kind`.
///
/// Shared by inbound decoding and operator input; performs no range check.
pub fn parse(kind: &ValueKind, text: &str) -> Result<Value, CodecError> {
    match kind {
        ValueKind::Numeric { .. } => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(CodecError::Empty);
            }
            let n: f64 = trimmed
                .parse()
                .map_err(|_| CodecError::NotNumeric(trimmed.to_string()))?;
            if !n.is_finite() {
                return Err(CodecError::NotFinite);
            }
            Ok(Value::Numeric(n))
        }
        ValueKind::Boolean => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(CodecError::Empty);
            }
            match trimmed.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => Ok(Value::Boolean(true)),
                "0" | "false" | "off" => Ok(Value::Boolean(false)),
                _ => Err(CodecError::NotBoolean(trimmed.to_string())),
            }
        }
        ValueKind::Text { max_len } => {
            if text.len() > *max_len {
                return Err(CodecError::TooLong {
                    len: text.len(),
                    max: *max_len,
                });
            }
            Ok(Value::Text(text.to_string()))
        }
    }
}

/// Check that `value` is acceptable as a command for a channel of `kind`.
pub fn validate(kind: &ValueKind, value: &Value) -> Result<(), CodecError> {
    match (kind, value) {
        (ValueKind::Numeric { min, max }, Value::Numeric(n)) => {
            if !n.is_finite() {
                return Err(CodecError::NotFinite);
            }
            if n < min || n > max {
                return Err(CodecError::OutOfRange {
                    value: *n,
                    min: *min,
                    max: *max,
                });
            }
            Ok(())
        }
        (ValueKind::Boolean, Value::Boolean(_)) => Ok(()),
        (ValueKind::Text { max_len }, Value::Text(s)) => {
            if s.len() > *max_len {
                Err(CodecError::TooLong {
                    len: s.len(),
                    max: *max_len,
                })
            } else {
                Ok(())
            }
        }
        (ValueKind::Numeric { .. }, _) => Err(CodecError::KindMismatch { expected: "numeric" }),
        (ValueKind::Boolean, _) => Err(CodecError::KindMismatch { expected: "boolean" }),
        (ValueKind::Text { .. }, _) => Err(CodecError::KindMismatch { expected: "text" }),
    }
}

/// Encode a command value as wire bytes.
pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::Numeric(n) => n.to_string().into_bytes(),
        Value::Boolean(b) => if *b { b"1".to_vec() } else { b"0".to_vec() },
        Value::Text(s) => s.clone().into_bytes(),
    }
}
