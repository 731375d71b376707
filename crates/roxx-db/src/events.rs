//! Auth-state notifications owned by the user directory.
//!
//! Subscribers get a handle they either keep polling or hand back through
//! [`AuthSubscription::unsubscribe`]; there is no global listener list.

use chrono::{DateTime, Utc};
use roxx_types::models::UserProfile;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn { uid: String, at: DateTime<Utc> },
    SignedOut { uid: String, at: DateTime<Utc> },
    ProfileUpdated { profile: UserProfile },
    Suspended { uid: String, at: DateTime<Utc> },
    Deleted { uid: String },
}

impl AuthEvent {
    pub fn uid(&self) -> &str {
        match self {
            Self::SignedIn { uid, .. }
            | Self::SignedOut { uid, .. }
            | Self::Suspended { uid, .. }
            | Self::Deleted { uid } => uid,
            Self::ProfileUpdated { profile } => &profile.uid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl Default for AuthBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AuthBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishing with nobody listening is not an error.
    pub fn publish(&self, event: AuthEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription {
            rx: self.tx.subscribe(),
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[derive(Debug)]
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// Waits for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => {
                    warn!("Auth subscriber lagged by {} events", n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event, if any.
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_releases_the_handle() {
        let bus = AuthBus::default();
        let mut sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(AuthEvent::Deleted { uid: "x1".into() });
        assert_eq!(sub.try_recv().map(|e| e.uid().to_string()), Some("x1".into()));
        assert!(sub.try_recv().is_none());

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        // still fine with no listeners
        bus.publish(AuthEvent::Deleted { uid: "x2".into() });
    }

    #[tokio::test]
    async fn recv_waits_for_publish() {
        let bus = AuthBus::default();
        let mut sub = bus.subscribe();
        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(AuthEvent::SignedOut {
                uid: "a1".into(),
                at: Utc::now(),
            });
        });
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, AuthEvent::SignedOut { ref uid, .. } if uid == "a1"));
    }
}
