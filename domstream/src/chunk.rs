//! Stream payload values
//!
//! A chunk is opaque to the stream. The only thing the stream checks is
//! whether a value may be stored at all:
//!
//! | value              | meaning                    |
//! |--------------------|----------------------------|
//! | `Undefined`        | valid chunk                |
//! | string             | valid chunk                |
//! | object or array    | valid chunk                |
//! | `null`             | end of stream, not a chunk |
//! | number or boolean  | rejected                   |

use serde_json::{Map, Value};

use crate::error::StreamError;

/// One discrete unit of stream payload
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Explicitly absent but defined payload
    Undefined,
    Value(Value),
}

impl Chunk {
    /// End-of-stream sentinel
    pub const END: Chunk = Chunk::Value(Value::Null);

    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Chunk::Value(Value::Null))
    }

    /// Name of the chunk's type, as reported in errors and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Chunk::Undefined => "undefined",
            Chunk::Value(v) => value_kind(v),
        }
    }

    /// Check that the chunk may be stored in a buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidChunkType` for numbers, booleans and the end sentinel.
    pub fn validate(&self) -> Result<(), StreamError> {
        match self {
            Chunk::Undefined
            | Chunk::Value(Value::String(_) | Value::Array(_) | Value::Object(_)) => Ok(()),
            _ => Err(StreamError::InvalidChunkType { kind: self.kind() }),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Chunk::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Chunk::Value(v) => Some(v),
            Chunk::Undefined => None,
        }
    }
}

/// Name of a JSON value's type
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Value(Value::String(s))
    }
}

impl From<Value> for Chunk {
    fn from(v: Value) -> Self {
        Chunk::Value(v)
    }
}

impl From<Map<String, Value>> for Chunk {
    fn from(m: Map<String, Value>) -> Self {
        Chunk::Value(Value::Object(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_kinds() {
        assert!(Chunk::Undefined.validate().is_ok());
        assert!(Chunk::from("text").validate().is_ok());
        assert!(Chunk::from(json!({"x": 1})).validate().is_ok());
        assert!(Chunk::from(json!([1, 2])).validate().is_ok());
    }

    #[test]
    fn test_invalid_kinds() {
        for (chunk, kind) in [
            (Chunk::from(json!(42)), "number"),
            (Chunk::from(json!(true)), "boolean"),
            (Chunk::END, "null"),
        ] {
            match chunk.validate() {
                Err(StreamError::InvalidChunkType { kind: k }) => assert_eq!(k, kind),
                other => panic!("expected InvalidChunkType, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_end_sentinel() {
        assert!(Chunk::END.is_end());
        assert!(Chunk::from(Value::Null).is_end());
        assert!(!Chunk::Undefined.is_end());
    }
}
