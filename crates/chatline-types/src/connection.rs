use serde::{Deserialize, Serialize};

/// A live subscriber as recorded in the connections table.
///
/// The transport handle itself lives in the gateway; this is only the
/// reference the pipeline needs to address a push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub connected_at: i64,
}

impl Connection {
    pub fn new(connection_id: impl Into<String>, connected_at: i64) -> Self {
        Self {
            connection_id: connection_id.into(),
            channel_id: None,
            connected_at,
        }
    }

    pub fn in_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Whether this connection should receive events for `channel_id`.
    pub fn subscribes_to(&self, channel_id: &str) -> bool {
        self.channel_id.as_deref() == Some(channel_id)
    }
}
