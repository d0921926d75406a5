use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    domain::{RoomId, UserId},
    error::ProtocolError,
};

/// One JSON text frame on the realtime stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Envelope {
    Register {
        user_id: UserId,
        emotion: String,
    },
    JoinRoom {
        user_id: UserId,
        room_id: RoomId,
    },
    LeaveRoom {
        user_id: UserId,
        room_id: RoomId,
    },
    ChatMessage(ChatEnvelope),
    /// Any `type` this client does not know. Never sent.
    #[serde(other, skip_serializing)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
    /// Ciphertext when `encrypted` is set.
    pub message: String,
    /// Absent or `null` means plaintext.
    #[serde(default, deserialize_with = "null_as_false")]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_emotion: Option<String>,
    /// RFC 3339 or epoch milliseconds. Anything else is dropped and the
    /// receiver stamps its own arrival time.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Envelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Register { .. } => "register",
            Envelope::JoinRoom { .. } => "join_room",
            Envelope::LeaveRoom { .. } => "leave_room",
            Envelope::ChatMessage(_) => "chat_message",
            Envelope::Unknown => "unknown",
        }
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Some(serde_json::Value::Number(millis)) => {
            millis.as_i64().and_then(DateTime::from_timestamp_millis)
        }
        _ => None,
    })
}

pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(ProtocolError::Encode)
}

/// Unrecognized `type` values decode to [`Envelope::Unknown`]; anything that
/// is not a JSON object with a `type` field is malformed.
pub fn decode_envelope(frame: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(frame).map_err(ProtocolError::Malformed)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub emotion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    pub max_participants: u32,
    #[serde(default)]
    pub participants: u32,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
