use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

use stackline_types::events::GatewayEvent;
use stackline_types::models::Role;

/// Capacity of the fan-out channel. A client that falls further behind than
/// this skips the oldest events.
const BROADCAST_CAPACITY: usize = 1024;

/// An event serialized once, shared by every connection.
#[derive(Debug, Clone)]
pub struct BroadcastFrame {
    pub name: &'static str,
    pub json: Arc<str>,
}

/// A live dashboard connection.
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub user_id: Uuid,
    pub role: Role,
}

/// Fans every event out to every connected dashboard. No addressing, no
/// acknowledgement, no replay.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<BroadcastFrame>,

    /// conn_id -> client
    clients: RwLock<HashMap<Uuid, ConnectedClient>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                clients: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast frames.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastFrame> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Returns how many
    /// receivers it was handed to; zero is not an error.
    pub fn broadcast(&self, event: GatewayEvent) -> usize {
        let name = event.name();
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", name, e);
                return 0;
            }
        };

        let frame = BroadcastFrame {
            name,
            json: json.into(),
        };
        let delivered = self.inner.broadcast_tx.send(frame).unwrap_or(0);
        debug!("Broadcast {} to {} receivers", name, delivered);
        delivered
    }

    /// Record a connection. Returns its conn_id.
    pub async fn register(&self, user_id: Uuid, role: Role) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .clients
            .write()
            .await
            .insert(conn_id, ConnectedClient { user_id, role });
        conn_id
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.clients.write().await.remove(&conn_id);
    }

    /// Number of open dashboard connections.
    pub async fn connected(&self) -> usize {
        self.inner.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_gets_every_event() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        let id = Uuid::new_v4();
        assert_eq!(dispatcher.broadcast(GatewayEvent::MessageDeleted { id }), 2);

        for rx in [&mut a, &mut b] {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.name, "message_deleted");
            let value: serde_json::Value = serde_json::from_str(&frame.json).unwrap();
            assert_eq!(value["data"]["id"], id.to_string());
        }
    }

    #[tokio::test]
    async fn broadcast_without_listeners_is_dropped() {
        let dispatcher = Dispatcher::new();
        assert_eq!(
            dispatcher.broadcast(GatewayEvent::TicketDeleted { id: Uuid::new_v4() }),
            0
        );

        // A late subscriber does not see it
        let mut late = dispatcher.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn tracks_connections() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let first = dispatcher.register(user, Role::Client).await;
        let second = dispatcher.register(user, Role::Client).await;
        assert_eq!(dispatcher.connected().await, 2);

        dispatcher.unregister(first).await;
        assert_eq!(dispatcher.connected().await, 1);
        dispatcher.unregister(second).await;
        assert_eq!(dispatcher.connected().await, 0);
    }
}
