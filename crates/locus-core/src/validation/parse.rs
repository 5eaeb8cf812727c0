//! Extraction payload parsing.
//!
//! Extraction output is either a JSON object or the raw model text, which often wraps the
//! JSON in a Markdown code fence or surrounds it with prose.

use super::errors::ParseError;
use crate::types::CandidateRecord;
use serde_json::{Map, Value};

/// Parses an extraction payload into a record.
///
/// # Errors
///
/// Returns [`ParseError`] if the payload is empty, not JSON, not an object, or its fields
/// have the wrong shape.
pub fn parse_payload(payload: &Value) -> Result<CandidateRecord, ParseError> {
    let object = payload_object(payload)?;
    serde_json::from_value(Value::Object(object)).map_err(|e| ParseError::Schema(e.to_string()))
}

/// Returns the payload as a JSON object, decoding text payloads first.
///
/// # Errors
///
/// Returns [`ParseError`] if the payload cannot be read as an object.
pub fn payload_object(payload: &Value) -> Result<Map<String, Value>, ParseError> {
    match payload {
        Value::Object(object) => Ok(object.clone()),
        Value::String(text) => {
            let body = strip_code_fences(text);
            if body.is_empty() {
                return Err(ParseError::Empty);
            }
            match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(object)) => Ok(object),
                Ok(other) => Err(ParseError::NotAnObject(kind_of(&other))),
                Err(e) => Err(ParseError::InvalidJson(e.to_string())),
            }
        }
        Value::Null => Err(ParseError::Empty),
        other => Err(ParseError::NotAnObject(kind_of(other))),
    }
}

/// Removes a surrounding Markdown code fence and any prose outside the outermost braces.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix("```") {
        // Drop the info string (```json) up to the first newline.
        body = rest.split_once('\n').map_or("", |(_, after)| after);
        if let Some(end) = body.rfind("```") {
            body = &body[..end];
        }
        body = body.trim();
    }

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end && !body.starts_with('[') => &body[start..=end],
        _ => body,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
