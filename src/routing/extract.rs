//! Payload field extraction
//!
//! Payloads are loosely typed JSON objects. Coercion is lenient in the
//! usual JSON-object way:
//!
//! - string fields accept strings and numbers
//! - integer fields accept integral numbers and numeric strings
//! - boolean fields accept booleans and `"true"`/`"false"` in any case
//! - text fields accept any value, rendered as JSON when not a string
//!
//! Anything else, including `null`, is a type error for typed fields.

use serde_json::{Map, Value};
use thiserror::Error;

pub type Payload = Map<String, Value>;

/// Why one descriptor could not extract its arguments
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractError {
    #[error("payload is not a JSON object: {0}")]
    InvalidPayload(String),

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("field `{field}` is not {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

impl ExtractError {
    fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.to_string(),
            expected,
        }
    }
}

/// Parse a payload that must be a JSON object
pub fn parse_payload(bytes: &[u8]) -> Result<Payload, ExtractError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ExtractError::InvalidPayload(format!(
            "expected an object, found {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(ExtractError::InvalidPayload(e.to_string())),
    }
}

/// Presence test; a `null` value still counts as present
pub fn has(payload: &Payload, field: &str) -> bool {
    payload.contains_key(field)
}

fn require<'a>(payload: &'a Payload, field: &str) -> Result<&'a Value, ExtractError> {
    payload
        .get(field)
        .ok_or_else(|| ExtractError::MissingField(field.to_string()))
}

pub fn string_field(payload: &Payload, field: &str) -> Result<String, ExtractError> {
    match require(payload, field)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ExtractError::wrong_type(field, "a string")),
    }
}

/// Any present value as text: strings verbatim, everything else as its
/// JSON rendering
pub fn text_field(payload: &Payload, field: &str) -> Result<String, ExtractError> {
    match require(payload, field)? {
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

pub fn int_field(payload: &Payload, field: &str) -> Result<i64, ExtractError> {
    match require(payload, field)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ExtractError::wrong_type(field, "an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ExtractError::wrong_type(field, "an integer")),
        _ => Err(ExtractError::wrong_type(field, "an integer")),
    }
}

pub fn bool_field(payload: &Payload, field: &str) -> Result<bool, ExtractError> {
    match require(payload, field)? {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(ExtractError::wrong_type(field, "a boolean")),
    }
}

pub fn array_field<'a>(payload: &'a Payload, field: &str) -> Result<&'a [Value], ExtractError> {
    match require(payload, field)? {
        Value::Array(items) => Ok(items),
        _ => Err(ExtractError::wrong_type(field, "an array")),
    }
}

/// Element `index` of an array field, which must itself be an object
pub fn object_element<'a>(
    items: &'a [Value],
    field: &str,
    index: usize,
) -> Result<&'a Payload, ExtractError> {
    items
        .get(index)
        .and_then(Value::as_object)
        .ok_or_else(|| ExtractError::WrongType {
            field: format!("{field}[{index}]"),
            expected: "an object",
        })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
