use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::time::{iso8601, is_representable};

/// Content type assumed when a message does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "text";

/// Who authored a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(DecodeError::UnknownRole(other.to_string())),
        }
    }
}

/// One message in a channel.
///
/// Events are append-only: created once (by the write path or by the
/// responder) and never mutated or deleted. `id` is globally unique and is
/// the key used for duplicate suppression; `(channel_id, ts)` is the storage
/// key.
///
/// Serialized attribute names are camelCase. Deserialization goes through
/// [`ChatEvent::try_from`] on an attribute map, which also accepts the
/// snake_case spellings and fills in derived fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Map<String, Value>")]
pub struct ChatEvent {
    pub id: String,
    pub channel_id: String,
    /// Unix seconds; sort key within the channel.
    pub ts: i64,
    pub sender_id: String,
    pub role: Role,
    pub content: String,
    pub content_type: String,
    pub created_at_iso: String,
}

impl ChatEvent {
    /// Build an event, deriving `created_at_iso` from `ts`.
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        ts: i64,
        sender_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            ts,
            sender_id: sender_id.into(),
            role,
            content: content.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            created_at_iso: iso8601(ts),
        }
    }

    /// A fresh, time-ordered event identifier (UUID v7).
    pub fn generate_id() -> String {
        uuid::Uuid::now_v7().to_string()
    }

    /// Move the event to a new timestamp, keeping `created_at_iso` in sync.
    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = ts;
        self.created_at_iso = iso8601(ts);
        self
    }

    pub fn is_user_authored(&self) -> bool {
        self.role == Role::User
    }

    /// The envelope pushed to subscribers.
    pub fn to_wire(&self) -> WirePayload {
        WirePayload {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            sender_id: self.sender_id.clone(),
            role: self.role,
            content: self.content.clone(),
            content_type: self.content_type.clone(),
            created_at_iso: self.created_at_iso.clone(),
        }
    }
}

impl TryFrom<Map<String, Value>> for ChatEvent {
    type Error = DecodeError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let id = required_str(&map, "id", &["id"])?;
        let channel_id = required_str(&map, "channelId", &["channelId", "channel_id"])?;
        let sender_id = required_str(&map, "senderId", &["senderId", "sender_id"])?;
        let content = optional_str(&map, "content", &["content"])?.unwrap_or_default();
        let role = optional_str(&map, "role", &["role"])?
            .map(|r| r.parse::<Role>())
            .transpose()?
            .unwrap_or(Role::User);
        let ts = timestamp(&map)?;
        let content_type = optional_str(&map, "contentType", &["contentType", "content_type"])?
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let created_at_iso =
            optional_str(&map, "createdAtIso", &["createdAtIso", "created_at_iso"])?
                .unwrap_or_else(|| iso8601(ts));

        Ok(Self {
            id,
            channel_id,
            ts,
            sender_id,
            role,
            content,
            content_type,
            created_at_iso,
        })
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|name| map.get(*name))
        .filter(|v| !v.is_null())
}

fn optional_str(
    map: &Map<String, Value>,
    name: &'static str,
    aliases: &[&str],
) -> Result<Option<String>, DecodeError> {
    match lookup(map, aliases) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(DecodeError::WrongType {
            name,
            expected: "string",
        }),
    }
}

fn required_str(
    map: &Map<String, Value>,
    name: &'static str,
    aliases: &[&str],
) -> Result<String, DecodeError> {
    let value = optional_str(map, name, aliases)?.ok_or(DecodeError::MissingAttribute(name))?;
    if value.trim().is_empty() {
        return Err(DecodeError::Empty(name));
    }
    Ok(value)
}

/// `ts` may arrive as a JSON integer or as a numeric string (stream images
/// carry numbers as strings). Values with no calendar date are rejected.
fn timestamp(map: &Map<String, Value>) -> Result<i64, DecodeError> {
    let wrong = DecodeError::WrongType {
        name: "ts",
        expected: "integer",
    };
    let ts = match lookup(map, &["ts"]) {
        None => return Err(DecodeError::MissingAttribute("ts")),
        Some(Value::Number(n)) => n.as_i64().ok_or(wrong)?,
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| wrong)?,
        Some(_) => return Err(wrong),
    };
    if !is_representable(ts) {
        return Err(DecodeError::WrongType {
            name: "ts",
            expected: "unix seconds within the calendar range",
        });
    }
    Ok(ts)
}

/// JSON envelope pushed to a subscriber connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub role: Role,
    pub content: String,
    pub content_type: String,
    pub created_at_iso: String,
}

impl WirePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A client-supplied message write. The channel comes from the request path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

impl NewMessage {
    pub fn user(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            role: Role::User,
        }
    }

    pub fn into_event(self, channel_id: impl Into<String>, ts: i64) -> ChatEvent {
        ChatEvent::new(
            self.id,
            channel_id,
            ts,
            self.sender_id,
            self.role,
            self.content,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn new_derives_iso_timestamp() {
        let event = ChatEvent::new("m1", "c1", 1_704_067_200, "u1", Role::User, "hi");
        assert_eq!(event.created_at_iso, "2024-01-01T00:00:00Z");
        assert_eq!(event.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn serializes_camel_case() {
        let event = ChatEvent::new("m1", "c1", 100, "u1", Role::Assistant, "hi");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["channelId"], "c1");
        assert_eq!(value["senderId"], "u1");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["ts"], 100);
        assert!(value.get("channel_id").is_none());
    }

    #[test]
    fn decodes_snake_case_and_string_ts() {
        let map = as_map(json!({
            "id": "m-1",
            "channel_id": "ch-1",
            "sender_id": "u-1",
            "ts": "1700000000",
            "role": "user",
            "content": "hello",
        }));
        let event = ChatEvent::try_from(map).unwrap();
        assert_eq!(event.channel_id, "ch-1");
        assert_eq!(event.ts, 1_700_000_000);
        assert_eq!(event.content_type, "text");
        assert_eq!(event.created_at_iso, iso8601(1_700_000_000));
    }

    #[test]
    fn decode_rejects_missing_channel() {
        let map = as_map(json!({"id": "m1", "senderId": "u", "ts": 1}));
        assert_eq!(
            ChatEvent::try_from(map),
            Err(DecodeError::MissingAttribute("channelId"))
        );
    }

    #[test]
    fn decode_rejects_unknown_role() {
        let map = as_map(json!({
            "id": "m1", "channelId": "c", "senderId": "u", "ts": 1, "role": "robot"
        }));
        assert_eq!(
            ChatEvent::try_from(map),
            Err(DecodeError::UnknownRole("robot".into()))
        );
    }

    #[test]
    fn decode_rejects_fractional_ts() {
        let map = as_map(json!({"id": "m1", "channelId": "c", "senderId": "u", "ts": 1.5}));
        assert!(matches!(
            ChatEvent::try_from(map),
            Err(DecodeError::WrongType { name: "ts", .. })
        ));
    }

    #[test]
    fn decode_rejects_out_of_range_ts() {
        for ts in [json!(i64::MAX), json!(i64::MAX.to_string()), json!(i64::MIN)] {
            let map = as_map(json!({"id": "m1", "channelId": "c", "senderId": "u", "ts": ts}));
            assert_eq!(
                ChatEvent::try_from(map),
                Err(DecodeError::WrongType {
                    name: "ts",
                    expected: "unix seconds within the calendar range",
                })
            );
        }
    }

    #[test]
    fn deserialize_goes_through_try_from() {
        let event: ChatEvent = serde_json::from_value(json!({
            "id": "m1", "channelId": "c1", "senderId": "u1", "ts": 5, "content": "x"
        }))
        .unwrap();
        assert_eq!(event.role, Role::User);

        let err = serde_json::from_value::<ChatEvent>(json!({"id": "m1"})).unwrap_err();
        assert!(err.to_string().contains("missing attribute"));
    }

    #[test]
    fn wire_payload_omits_ts() {
        let event = ChatEvent::new("m1", "c1", 100, "u1", Role::User, "hi");
        let bytes = event.to_wire().to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["channelId", "content", "contentType", "createdAtIso", "id", "role", "senderId"]
        );
    }

    #[test]
    fn with_ts_keeps_iso_in_sync() {
        let event = ChatEvent::new("m1", "c1", 0, "u1", Role::User, "hi").with_ts(86_400);
        assert_eq!(event.created_at_iso, "1970-01-02T00:00:00Z");
    }

    #[test]
    fn new_message_defaults_to_user_role() {
        let msg: NewMessage =
            serde_json::from_value(json!({"id": "m1", "senderId": "u1", "content": "hi"}))
                .unwrap();
        assert_eq!(msg.role, Role::User);
        let event = msg.into_event("c1", 10);
        assert_eq!(event.channel_id, "c1");
        assert_eq!(event.ts, 10);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ChatEvent::generate_id(), ChatEvent::generate_id());
    }
}
