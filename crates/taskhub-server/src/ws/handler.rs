use crate::auth::verify_token;
use crate::authority;
use crate::db::Store;
use crate::error::Result;
use crate::state::AppState;
use crate::ws::RoomHub;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use taskhub_protocol::{ClientEvent, ReceivedMessage, ServerEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

/// GET /ws
///
/// Refuses the upgrade outright when the realtime hub is not running.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Result<Response> {
    let hub = state.realtime.hub()?.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, hub)))
}

async fn send_direct(sender: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
            return false;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, message: &str) {
    send_direct(
        sender,
        &ServerEvent::Error {
            message: message.to_string(),
        },
    )
    .await;
}

async fn handle_socket(socket: WebSocket, state: AppState, hub: Arc<RoomHub>) {
    let (mut sender, mut receiver) = socket.split();

    // First message should be authentication
    let auth_msg = match receiver.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            tracing::warn!("WebSocket closed before authentication");
            return;
        }
    };

    let user_id = match serde_json::from_str::<ClientEvent>(auth_msg.as_str()) {
        Ok(ClientEvent::Authenticate { token }) => match verify_token(&token, &state.config.jwt_secret) {
            Ok(claims) => claims.sub,
            Err(_) => {
                reject(&mut sender, "Invalid token").await;
                return;
            }
        },
        Ok(_) => {
            reject(&mut sender, "First message must be authentication").await;
            return;
        }
        Err(e) => {
            tracing::warn!("Invalid auth message: {}", e);
            reject(&mut sender, "Invalid message format").await;
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    if !send_direct(&mut sender, &ServerEvent::Authenticated { connection_id }).await {
        return;
    }

    tracing::info!("User {} authenticated on WebSocket ({})", user_id, connection_id);

    // Outbound events are queued here and written by a dedicated task
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    hub.add_connection(connection_id, user_id, tx).await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => handle_client_event(&state, &hub, user_id, connection_id, event).await,
                Err(e) => {
                    tracing::warn!("Invalid event from {}: {}", user_id, e);
                    send_error(&hub, connection_id, "Invalid message format").await;
                }
            },
            Ok(Message::Ping(_)) => {
                hub.send_to_connection(connection_id, &ServerEvent::Pong).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error for user {}: {}", user_id, e);
                break;
            }
            _ => {}
        }
    }

    hub.remove_connection(connection_id).await;
    send_task.abort();

    tracing::info!("User {} disconnected from WebSocket ({})", user_id, connection_id);
}

async fn send_error(hub: &RoomHub, connection_id: Uuid, message: &str) {
    hub.send_to_connection(
        connection_id,
        &ServerEvent::Error {
            message: message.to_string(),
        },
    )
    .await;
}

/// Reads the room of a relayed message from its `group` or `groupId` field.
fn relayed_group_id(message: &Value) -> Option<Uuid> {
    ["group", "groupId"]
        .iter()
        .filter_map(|key| message.get(*key))
        .find_map(|v| match v {
            Value::String(s) => s.parse().ok(),
            // A populated group object carries its own id
            Value::Object(obj) => obj.get("id").and_then(Value::as_str).and_then(|s| s.parse().ok()),
            _ => None,
        })
}

async fn is_group_member(store: &dyn Store, group_id: Uuid, user_id: Uuid) -> Result<bool> {
    Ok(store
        .get_group(group_id)
        .await?
        .is_some_and(|group| authority::is_member(&group, user_id)))
}

/// Puts the connection in the group's room when the user belongs to the group.
async fn join_room(
    store: &dyn Store,
    hub: &RoomHub,
    user_id: Uuid,
    connection_id: Uuid,
    group_id: Uuid,
) -> Result<bool> {
    if !is_group_member(store, group_id, user_id).await? {
        return Ok(false);
    }
    hub.join(connection_id, group_id).await;
    confirm_join(store, hub, user_id, connection_id, group_id).await
}

/// Reads membership again after joining. A removal that raced the join has
/// already evicted, so the connection takes itself back out of the room.
async fn confirm_join(
    store: &dyn Store,
    hub: &RoomHub,
    user_id: Uuid,
    connection_id: Uuid,
    group_id: Uuid,
) -> Result<bool> {
    let still_member = is_group_member(store, group_id, user_id).await;
    if !matches!(still_member, Ok(true)) {
        hub.leave(connection_id, group_id).await;
    }
    still_member
}

async fn handle_client_event(
    state: &AppState,
    hub: &RoomHub,
    user_id: Uuid,
    connection_id: Uuid,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Authenticate { .. } => {
            // Already authenticated
        }
        ClientEvent::JoinGroup { group_id } => {
            match join_room(state.store.as_ref(), hub, user_id, connection_id, group_id).await {
                Ok(true) => {
                    tracing::debug!("User {} joined room {}", user_id, group_id);
                    hub.send_to_connection(connection_id, &ServerEvent::GroupJoined { group_id })
                        .await;
                }
                Ok(false) => {
                    tracing::warn!("User {} refused room {}: not a member", user_id, group_id);
                    send_error(hub, connection_id, "You are not a member of this group").await;
                }
                Err(e) => {
                    tracing::error!("Failed to join room {}: {}", group_id, e);
                    send_error(hub, connection_id, "Could not join group").await;
                }
            }
        }
        ClientEvent::LeaveGroup { group_id } => {
            hub.leave(connection_id, group_id).await;
            tracing::debug!("User {} left room {}", user_id, group_id);
            hub.send_to_connection(connection_id, &ServerEvent::GroupLeft { group_id })
                .await;
        }
        ClientEvent::NewMessage { message } => {
            let Some(group_id) = relayed_group_id(&message) else {
                send_error(hub, connection_id, "Message must name its group").await;
                return;
            };
            if !hub.is_joined(connection_id, group_id).await {
                tracing::warn!("User {} relayed to unjoined room {}", user_id, group_id);
                send_error(hub, connection_id, "Join the group before sending to it").await;
                return;
            }

            // Relayed as-is and never stored
            hub.broadcast_to_group(
                group_id,
                &ServerEvent::ReceiveMessage {
                    message: ReceivedMessage::Ephemeral(message),
                    ephemeral: true,
                },
            )
            .await;
        }
        ClientEvent::Typing { group_id, username } => {
            if !hub.is_joined(connection_id, group_id).await {
                tracing::warn!("User {} sent typing to unjoined room {}", user_id, group_id);
                return;
            }
            hub.broadcast_to_group_except(
                group_id,
                connection_id,
                &ServerEvent::UserTyping { group_id, username },
            )
            .await;
        }
        ClientEvent::Ping => {
            hub.send_to_connection(connection_id, &ServerEvent::Pong).await;
        }
    }
}
