use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EmotionError;

/// Body of `POST /detect-emotion`, read from a JSON object.
///
/// `text` is `None` when the key is missing or holds an empty value of any
/// type (`null`, `false`, `0`, `""`, `[]`, `{}`); those are validation errors
/// further down. A non-empty value that is not a string cannot be classified.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionRequest {
    pub text: Option<String>,
}

impl TryFrom<Map<String, Value>> for EmotionRequest {
    type Error = EmotionError;

    fn try_from(mut body: Map<String, Value>) -> Result<Self, Self::Error> {
        let text = match body.remove("text") {
            None => None,
            Some(value) if is_empty_value(&value) => None,
            Some(Value::String(text)) => Some(text),
            Some(other) => {
                return Err(EmotionError::Failure(format!(
                    "text must be a string, got {other}"
                )));
            }
        };
        Ok(Self { text })
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

#[derive(Debug, Serialize)]
pub struct EmotionResponse {
    pub emotion: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// One entry of a classifier result.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}
