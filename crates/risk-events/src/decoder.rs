use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

const CUSTOMER: &str = "customer";
const SCORE: &str = "score";
const RISK_DATE: &str = "riskDate";

/// A customer's risk score as published on the events topic.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskEvent {
    pub customer: String,
    pub score: f64,
    pub risk_date: NaiveDate,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record has no payload")]
    NullPayload,
    #[error("payload is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("payload is not valid JSON")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    /// The schema field the error is about, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            DecodeError::MissingField(field) | DecodeError::InvalidField { field, .. } => {
                Some(*field)
            }
            _ => None,
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Decode a record payload, treating a tombstone as an error.
pub fn decode_record(payload: Option<&[u8]>) -> Result<RiskEvent, DecodeError> {
    decode(payload.ok_or(DecodeError::NullPayload)?)
}

/// Parse one JSON risk event. Unknown fields are ignored.
pub fn decode(payload: &[u8]) -> Result<RiskEvent, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    let Value::Object(fields) = serde_json::from_str::<Value>(text)? else {
        return Err(DecodeError::NotAnObject);
    };

    Ok(RiskEvent {
        customer: customer(&fields)?,
        score: score(&fields)?,
        risk_date: risk_date(&fields)?,
    })
}

/// A JSON `null` counts as absent.
fn required<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, DecodeError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn customer(fields: &Map<String, Value>) -> Result<String, DecodeError> {
    match required(fields, CUSTOMER)? {
        Value::String(s) if s.is_empty() => Err(DecodeError::invalid(CUSTOMER, "must not be empty")),
        Value::String(s) => Ok(s.clone()),
        other => Err(DecodeError::invalid(
            CUSTOMER,
            format!("expected a string, got {}", kind(other)),
        )),
    }
}

fn score(fields: &Map<String, Value>) -> Result<f64, DecodeError> {
    match required(fields, SCORE)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DecodeError::invalid(SCORE, format!("{n} is not representable as f64"))),
        other => Err(DecodeError::invalid(
            SCORE,
            format!("expected a number, got {}", kind(other)),
        )),
    }
}

fn risk_date(fields: &Map<String, Value>) -> Result<NaiveDate, DecodeError> {
    match required(fields, RISK_DATE)? {
        Value::String(s) => parse_date(s).ok_or_else(|| {
            DecodeError::invalid(RISK_DATE, format!("'{s}' is not a YYYY-MM-DD date"))
        }),
        other => Err(DecodeError::invalid(
            RISK_DATE,
            format!("expected a date string, got {}", kind(other)),
        )),
    }
}

/// `YYYY-MM-DD`, optionally followed by a time part after `T` or a space.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let (date, rest) = NaiveDate::parse_and_remainder(s, "%Y-%m-%d").ok()?;
    (rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ')).then_some(date)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
