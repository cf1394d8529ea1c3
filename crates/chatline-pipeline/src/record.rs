//! Change-stream records.
//!
//! Two envelopes are accepted:
//!
//! - `{"eventName": "INSERT", "changeImage": {...}}` with a plain JSON image
//! - `{"eventName": "INSERT", "dynamodb": {"NewImage": {...}}}` where every
//!   attribute is a typed descriptor (`{"S": "..."}`, `{"N": "42"}`, ...)
//!
//! A batch is either `{"Records": [...]}` or a bare array of records.

use std::fmt;
use std::str::FromStr;

use chatline_types::{ChatEvent, DecodeError};
use serde_json::{json, Map, Number, Value};

/// Kind of change a stream record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    Insert,
    Modify,
    Remove,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "MODIFY" => Ok(Self::Modify),
            "REMOVE" => Ok(Self::Remove),
            other => Err(DecodeError::Malformed(format!("unknown eventName '{other}'"))),
        }
    }
}

/// One change notification.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRecord {
    pub event_name: EventName,
    /// The item after the change, as plain JSON. Absent for removals.
    pub image: Option<Map<String, Value>>,
}

impl StreamRecord {
    /// An `INSERT` record carrying `event` as its image.
    pub fn insert(event: &ChatEvent) -> Result<Self, serde_json::Error> {
        let image = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            event_name: EventName::Insert,
            image: Some(image),
        })
    }

    pub fn parse(value: &Value) -> Result<Self, DecodeError> {
        let record = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("stream record must be an object".into()))?;

        let event_name = match record.get("eventName") {
            Some(Value::String(name)) => name.parse()?,
            Some(_) => {
                return Err(DecodeError::WrongType {
                    name: "eventName",
                    expected: "string",
                })
            }
            None => return Err(DecodeError::MissingAttribute("eventName")),
        };

        let image = if let Some(image) = record.get("changeImage") {
            match image {
                Value::Null => None,
                Value::Object(map) => Some(map.clone()),
                _ => {
                    return Err(DecodeError::WrongType {
                        name: "changeImage",
                        expected: "object",
                    })
                }
            }
        } else if let Some(Value::Object(map)) = record
            .get("dynamodb")
            .and_then(|change| change.get("NewImage"))
        {
            Some(decode_image(map)?)
        } else {
            None
        };

        Ok(Self { event_name, image })
    }

    /// The plain `{eventName, changeImage}` envelope.
    pub fn to_json(&self) -> Value {
        json!({
            "eventName": self.event_name.as_str(),
            "changeImage": self.image,
        })
    }

    /// Decode the image as a chat event.
    pub fn decode_event(&self) -> Result<ChatEvent, DecodeError> {
        let image = self
            .image
            .clone()
            .ok_or(DecodeError::MissingAttribute("changeImage"))?;
        ChatEvent::try_from(image)
    }
}

/// Split a batch document into its raw records.
pub fn parse_batch(input: &[u8]) -> Result<Vec<Value>, DecodeError> {
    let document: Value =
        serde_json::from_slice(input).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    match document {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => match map.remove("Records") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(DecodeError::MissingAttribute("Records")),
        },
        _ => Err(DecodeError::Malformed(
            "batch must be an array or an object with Records".into(),
        )),
    }
}

/// Decode an image of typed attribute descriptors to plain JSON.
pub fn decode_image(image: &Map<String, Value>) -> Result<Map<String, Value>, DecodeError> {
    image
        .iter()
        .map(|(name, value)| Ok((name.clone(), decode_attribute(value)?)))
        .collect()
}

/// Decode one typed attribute descriptor.
pub fn decode_attribute(value: &Value) -> Result<Value, DecodeError> {
    let malformed = || DecodeError::Malformed(format!("unsupported attribute descriptor {value}"));
    let descriptor = value.as_object().filter(|d| d.len() == 1).ok_or_else(malformed)?;
    let Some((tag, inner)) = descriptor.iter().next() else {
        return Err(malformed());
    };

    match (tag.as_str(), inner) {
        ("S", Value::String(s)) => Ok(Value::String(s.clone())),
        ("N", Value::String(n)) => parse_number(n).map(Value::Number),
        ("BOOL", Value::Bool(b)) => Ok(Value::Bool(*b)),
        ("NULL", _) => Ok(Value::Null),
        ("M", Value::Object(map)) => decode_image(map).map(Value::Object),
        ("L", Value::Array(items)) => items
            .iter()
            .map(decode_attribute)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ("SS", Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(Value::String(s.clone())),
                _ => Err(malformed()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ("NS", Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(n) => parse_number(n).map(Value::Number),
                _ => Err(malformed()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => Err(malformed()),
    }
}

fn parse_number(text: &str) -> Result<Number, DecodeError> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Number::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| DecodeError::Malformed(format!("invalid number '{text}'")))
}
