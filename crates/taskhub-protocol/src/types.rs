use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of a user, used wherever a reference is populated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl UserSummary {
    /// Placeholder for a sender whose profile no longer resolves
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            username: "unknown".to_string(),
            display_name: "Unknown".to_string(),
            avatar_url: None,
        }
    }
}

/// Chat message with its sender populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender: UserSummary,
    pub content: String,
    pub attachments: Vec<String>,
    pub read_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Payload of a `receive_message` event.
///
/// Messages sent over HTTP are persisted and arrive fully populated. Messages a
/// client pushes straight through the socket are relayed as-is and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReceivedMessage {
    Stored(MessageData),
    Ephemeral(serde_json::Value),
}
