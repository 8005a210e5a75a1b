//! Room-based fan-out for live group events.
//!
//! Each group id names one room. Connections join and leave rooms; a broadcast
//! reaches whoever is in the room at that moment and nothing is replayed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use taskhub_protocol::ServerEvent;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Realtime hub not initialized")]
    NotInitialized,

    #[error("Realtime hub already initialized")]
    AlreadyInitialized,
}

struct Connection {
    user_id: Uuid,
    sender: mpsc::UnboundedSender<String>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<Uuid, Connection>,
    /// Room (group id) to the connection ids inside it
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl HubState {
    fn drop_from_room(&mut self, connection_id: Uuid, group_id: Uuid) -> bool {
        let removed = self
            .rooms
            .get_mut(&group_id)
            .is_some_and(|members| members.remove(&connection_id));
        if self.rooms.get(&group_id).is_some_and(HashSet::is_empty) {
            self.rooms.remove(&group_id);
        }
        if let Some(conn) = self.connections.get_mut(&connection_id) {
            conn.rooms.remove(&group_id);
        }
        removed
    }
}

/// Connection and room registry. All mutations go through one lock, so a
/// broadcast never observes a half-applied join or leave.
#[derive(Default)]
pub struct RoomHub {
    state: RwLock<HubState>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_connection(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.state.write().await.connections.insert(
            connection_id,
            Connection {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );

        tracing::debug!("User {} connected with connection ID {}", user_id, connection_id);
    }

    pub async fn remove_connection(&self, connection_id: Uuid) {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.remove(&connection_id) else {
            return;
        };

        for group_id in &conn.rooms {
            if let Some(members) = state.rooms.get_mut(group_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    state.rooms.remove(group_id);
                }
            }
        }

        tracing::debug!("User {} disconnected (connection ID {})", conn.user_id, connection_id);
    }

    /// Puts the connection in the group's room. Returns false for unknown connections.
    pub async fn join(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        conn.rooms.insert(group_id);
        state.rooms.entry(group_id).or_default().insert(connection_id);

        tracing::debug!("Connection {} joined group {}", connection_id, group_id);
        true
    }

    pub async fn leave(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        let removed = self.state.write().await.drop_from_room(connection_id, group_id);
        if removed {
            tracing::debug!("Connection {} left group {}", connection_id, group_id);
        }
        removed
    }

    /// Removes every connection of `user_id` from the room, e.g. after the
    /// user lost membership.
    pub async fn evict_user(&self, group_id: Uuid, user_id: Uuid) -> usize {
        let mut state = self.state.write().await;
        let targets: Vec<Uuid> = state
            .rooms
            .get(&group_id)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|id| state.connections.get(id).is_some_and(|c| c.user_id == user_id))
                    .collect()
            })
            .unwrap_or_default();

        for connection_id in &targets {
            state.drop_from_room(*connection_id, group_id);
        }
        targets.len()
    }

    /// Empties the room, e.g. after its group was deleted.
    pub async fn close_room(&self, group_id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(members) = state.rooms.remove(&group_id) {
            for connection_id in members {
                if let Some(conn) = state.connections.get_mut(&connection_id) {
                    conn.rooms.remove(&group_id);
                }
            }
        }
    }

    pub async fn is_joined(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(&group_id)
            .is_some_and(|members| members.contains(&connection_id))
    }

    pub async fn room_size(&self, group_id: Uuid) -> usize {
        self.state.read().await.rooms.get(&group_id).map_or(0, HashSet::len)
    }

    /// Sends to every connection in the room. Returns how many were reached.
    pub async fn broadcast_to_group(&self, group_id: Uuid, event: &ServerEvent) -> usize {
        self.fan_out(group_id, None, event).await
    }

    /// Like [`broadcast_to_group`](Self::broadcast_to_group) but skips the originating connection.
    pub async fn broadcast_to_group_except(
        &self,
        group_id: Uuid,
        except: Uuid,
        event: &ServerEvent,
    ) -> usize {
        self.fan_out(group_id, Some(except), event).await
    }

    async fn fan_out(&self, group_id: Uuid, except: Option<Uuid>, event: &ServerEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize event: {}", e);
                return 0;
            }
        };

        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&group_id) else {
            tracing::debug!("No connections in group {}", group_id);
            return 0;
        };

        tracing::debug!(
            "Broadcasting {} to {} connections of group {}",
            event.name(),
            members.len(),
            group_id
        );

        let mut delivered = 0;
        for conn_id in members.iter().filter(|id| Some(**id) != except) {
            if let Some(conn) = state.connections.get(conn_id) {
                match conn.sender.send(json.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => tracing::error!("Failed to send event to {}: {}", conn_id, e),
                }
            }
        }
        delivered
    }

    pub async fn send_to_connection(&self, connection_id: Uuid, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize event: {}", e);
                return;
            }
        };

        let state = self.state.read().await;
        if let Some(conn) = state.connections.get(&connection_id) {
            if let Err(e) = conn.sender.send(json) {
                tracing::error!("Failed to send event to {}: {}", connection_id, e);
            }
        }
    }
}

/// Process-wide handle to the hub.
///
/// Cloned into every service that publishes events. It starts empty and is
/// filled exactly once during startup; publishing before that is an error.
#[derive(Clone, Default)]
pub struct Realtime {
    hub: Arc<OnceLock<Arc<RoomHub>>>,
}

impl Realtime {
    pub fn uninitialized() -> Self {
        Self::default()
    }

    pub fn init(&self, hub: Arc<RoomHub>) -> Result<(), HubError> {
        self.hub.set(hub).map_err(|_| HubError::AlreadyInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.hub.get().is_some()
    }

    pub fn hub(&self) -> Result<&Arc<RoomHub>, HubError> {
        self.hub.get().ok_or(HubError::NotInitialized)
    }

    pub async fn broadcast_to_group(&self, group_id: Uuid, event: &ServerEvent) -> Result<usize, HubError> {
        Ok(self.hub()?.broadcast_to_group(group_id, event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(hub: &RoomHub) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        hub.add_connection(connection_id, Uuid::new_v4(), tx).await;
        (connection_id, rx)
    }

    fn typing(group_id: Uuid) -> ServerEvent {
        ServerEvent::UserTyping {
            group_id,
            username: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_room_members() {
        let hub = RoomHub::new();
        let group = Uuid::new_v4();
        let (a, mut rx_a) = connect(&hub).await;
        let (_b, mut rx_b) = connect(&hub).await;

        assert!(hub.join(a, group).await);
        assert_eq!(hub.broadcast_to_group(group, &typing(group)).await, 1);

        let received: serde_json::Value = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
        assert_eq!(received["type"], "user_typing");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_and_disconnect_stop_delivery() {
        let hub = RoomHub::new();
        let group = Uuid::new_v4();
        let (a, _rx_a) = connect(&hub).await;
        let (b, _rx_b) = connect(&hub).await;
        hub.join(a, group).await;
        hub.join(b, group).await;
        assert_eq!(hub.room_size(group).await, 2);

        assert!(hub.leave(a, group).await);
        assert!(!hub.leave(a, group).await);
        hub.remove_connection(b).await;

        assert_eq!(hub.room_size(group).await, 0);
        assert_eq!(hub.broadcast_to_group(group, &typing(group)).await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_origin() {
        let hub = RoomHub::new();
        let group = Uuid::new_v4();
        let (a, mut rx_a) = connect(&hub).await;
        let (b, mut rx_b) = connect(&hub).await;
        hub.join(a, group).await;
        hub.join(b, group).await;

        assert_eq!(hub.broadcast_to_group_except(group, a, &typing(group)).await, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_evict_user_and_close_room() {
        let hub = RoomHub::new();
        let group = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        hub.add_connection(c1, user, tx1).await;
        hub.add_connection(c2, user, tx2).await;
        let (other, _rx) = connect(&hub).await;
        for c in [c1, c2, other] {
            hub.join(c, group).await;
        }

        assert_eq!(hub.evict_user(group, user).await, 2);
        assert!(!hub.is_joined(c1, group).await);
        assert!(hub.is_joined(other, group).await);

        hub.close_room(group).await;
        assert_eq!(hub.room_size(group).await, 0);
    }

    #[tokio::test]
    async fn test_uninitialized_realtime_fails_fast() {
        let realtime = Realtime::uninitialized();
        let group = Uuid::new_v4();

        assert_eq!(
            realtime.broadcast_to_group(group, &typing(group)).await,
            Err(HubError::NotInitialized)
        );

        realtime.init(Arc::new(RoomHub::new())).unwrap();
        assert!(realtime.is_initialized());
        assert_eq!(realtime.broadcast_to_group(group, &typing(group)).await, Ok(0));
        assert_eq!(
            realtime.init(Arc::new(RoomHub::new())),
            Err(HubError::AlreadyInitialized)
        );
    }
}
