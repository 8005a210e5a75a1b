use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ReceivedMessage;

/// Events sent from client to server via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Authenticate the connection; must be the first frame
    Authenticate { token: String },

    /// Join a group's room
    JoinGroup { group_id: Uuid },

    /// Leave a group's room
    LeaveGroup { group_id: Uuid },

    /// Relay a message to a room without persisting it.
    /// The message must name its room in a `group` (or `groupId`) field.
    NewMessage { message: serde_json::Value },

    /// Typing indicator
    Typing { group_id: Uuid, username: String },

    /// Ping to keep connection alive
    Ping,
}

/// Events sent from server to client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Authentication successful
    Authenticated { connection_id: Uuid },

    /// Error message
    Error { message: String },

    /// Pong response to ping
    Pong,

    /// Joined a group's room
    GroupJoined { group_id: Uuid },

    /// Left a group's room
    GroupLeft { group_id: Uuid },

    /// New message in a group
    ReceiveMessage {
        message: ReceivedMessage,
        #[serde(default)]
        ephemeral: bool,
    },

    /// Someone in the group is typing
    UserTyping { group_id: Uuid, username: String },

    /// Message removed from a group
    MessageDeleted { group_id: Uuid, message_id: Uuid },
}

impl ServerEvent {
    /// Event name as it appears in the `type` field
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
            ServerEvent::GroupJoined { .. } => "group_joined",
            ServerEvent::GroupLeft { .. } => "group_left",
            ServerEvent::ReceiveMessage { .. } => "receive_message",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
        }
    }
}
