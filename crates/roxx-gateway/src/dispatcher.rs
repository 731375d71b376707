use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use roxx_types::events::GatewayEvent;

/// Manages all connected clients and routes events to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Events every connected client receives (presence, stories)
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Track online users: uid -> display name
    online_users: RwLock<HashMap<String, String>>,

    /// Per-user targeted send channels: uid -> (conn_id, sender)
    user_channels: RwLock<HashMap<String, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. A newer connection for the same
    /// uid replaces the older one. Returns (conn_id, receiver).
    pub async fn register_user_channel(&self, uid: &str) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(uid.to_string(), (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, uid: &str, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if channels.get(uid).is_some_and(|(stored, _)| *stored == conn_id) {
            channels.remove(uid);
        }
    }

    /// Drop whatever connection `uid` holds. Its send loop sees the closed
    /// channel and ends the socket.
    pub async fn disconnect_user(&self, uid: &str) -> bool {
        self.inner.user_channels.write().await.remove(uid).is_some()
    }

    /// Send a targeted event to a specific user.
    pub async fn send_to_user(&self, uid: &str, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(uid) {
            let _ = tx.send(event);
        }
    }

    /// Send the same event to every listed user that is connected.
    pub async fn send_to_users<'a, I>(&self, uids: I, event: GatewayEvent)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let channels = self.inner.user_channels.read().await;
        for uid in uids {
            if let Some((_, tx)) = channels.get(uid.as_str()) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Register a user as online.
    pub async fn user_online(&self, uid: &str, name: &str, now: DateTime<Utc>) {
        self.inner
            .online_users
            .write()
            .await
            .insert(uid.to_string(), name.to_string());

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id: uid.to_string(),
            online: true,
            last_seen: now,
        });
    }

    /// Register a user as offline. Only cleans up if conn_id matches.
    pub async fn user_offline(&self, uid: &str, conn_id: Uuid, now: DateTime<Utc>) {
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(uid).is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            // A newer connection has taken over
            return;
        }

        self.inner.online_users.write().await.remove(uid);
        self.unregister_user_channel(uid, conn_id).await;

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id: uid.to_string(),
            online: false,
            last_seen: now,
        });
    }

    /// Forget `uid` as online regardless of which connection owns it.
    pub async fn forget_user(&self, uid: &str) {
        self.inner.online_users.write().await.remove(uid);
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(String, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(uid, name)| (uid.clone(), name.clone()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn is_online(&self, uid: &str) -> bool {
        self.inner.online_users.read().await.contains_key(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxx_types::models::CallKind;

    fn typing(chat: &str) -> GatewayEvent {
        GatewayEvent::TypingStart {
            chat_id: chat.into(),
            user_id: "u1".into(),
            name: "ana".into(),
        }
    }

    #[tokio::test]
    async fn targeted_events_reach_only_their_user() {
        let dispatcher = Dispatcher::new();
        let (_, mut a_rx) = dispatcher.register_user_channel("a").await;
        let (_, mut b_rx) = dispatcher.register_user_channel("b").await;

        dispatcher.send_to_user("a", typing("c1")).await;
        assert!(matches!(a_rx.try_recv(), Ok(GatewayEvent::TypingStart { .. })));
        assert!(b_rx.try_recv().is_err());

        let both = vec!["a".to_string(), "b".to_string(), "offline".to_string()];
        dispatcher.send_to_users(&both, typing("c2")).await;
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn stale_connection_does_not_take_a_newer_one_offline() {
        let dispatcher = Dispatcher::new();
        let now = Utc::now();
        let (old_conn, _old_rx) = dispatcher.register_user_channel("a").await;
        dispatcher.user_online("a", "ana", now).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel("a").await;

        dispatcher.user_offline("a", old_conn, now).await;
        assert!(dispatcher.is_online("a").await);

        dispatcher.send_to_user("a", typing("c1")).await;
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn going_offline_broadcasts_presence() {
        let dispatcher = Dispatcher::new();
        let mut all = dispatcher.subscribe();
        let now = Utc::now();
        let (conn, _rx) = dispatcher.register_user_channel("a").await;

        dispatcher.user_online("a", "ana", now).await;
        assert_eq!(dispatcher.online_users().await, vec![("a".to_string(), "ana".to_string())]);
        dispatcher.user_offline("a", conn, now).await;

        assert!(matches!(all.recv().await, Ok(GatewayEvent::PresenceUpdate { online: true, .. })));
        assert!(matches!(all.recv().await, Ok(GatewayEvent::PresenceUpdate { online: false, .. })));
        assert!(dispatcher.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_closes_the_user_channel() {
        let dispatcher = Dispatcher::new();
        let (_, mut rx) = dispatcher.register_user_channel("a").await;
        assert!(dispatcher.disconnect_user("a").await);
        assert!(rx.recv().await.is_none());
        assert!(!dispatcher.disconnect_user("a").await);

        // Unknown users are ignored
        dispatcher
            .send_to_user(
                "a",
                GatewayEvent::CallUpdate {
                    call: roxx_types::models::CallSession {
                        id: "call_1".into(),
                        caller_id: "b".into(),
                        receiver_id: "a".into(),
                        kind: CallKind::Voice,
                        status: roxx_types::models::CallStatus::Ringing,
                        timestamp: Utc::now(),
                        version: 0,
                    },
                },
            )
            .await;
    }
}
