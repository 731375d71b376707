//! Turns user-directory auth events into gateway presence traffic.

use chrono::Utc;
use tracing::{debug, info};

use roxx_db::{AuthEvent, AuthSubscription};
use roxx_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;

/// Relay auth events until the bus closes. Suspended and deleted accounts
/// also lose their live connection.
pub async fn relay_auth_events(mut events: AuthSubscription, dispatcher: Dispatcher) {
    while let Some(event) = events.recv().await {
        apply(&dispatcher, event).await;
    }
    debug!("Auth event bus closed, presence relay stopping");
}

async fn apply(dispatcher: &Dispatcher, event: AuthEvent) {
    match event {
        AuthEvent::SignedIn { uid, at } => {
            dispatcher.broadcast(GatewayEvent::PresenceUpdate {
                user_id: uid,
                online: true,
                last_seen: at,
            });
        }
        AuthEvent::SignedOut { uid, at } => {
            dispatcher.broadcast(GatewayEvent::PresenceUpdate {
                user_id: uid,
                online: false,
                last_seen: at,
            });
        }
        AuthEvent::Suspended { uid, at } => {
            if dispatcher.disconnect_user(&uid).await {
                info!(uid = %uid, "Closed gateway connection of suspended account");
            }
            dispatcher.forget_user(&uid).await;
            dispatcher.broadcast(GatewayEvent::PresenceUpdate {
                user_id: uid,
                online: false,
                last_seen: at,
            });
        }
        AuthEvent::Deleted { uid } => {
            dispatcher.disconnect_user(&uid).await;
            dispatcher.forget_user(&uid).await;
            dispatcher.broadcast(GatewayEvent::PresenceUpdate {
                user_id: uid,
                online: false,
                last_seen: Utc::now(),
            });
        }
        AuthEvent::ProfileUpdated { .. } => {}
    }
}
