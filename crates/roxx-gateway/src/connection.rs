use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, error, info, warn};

use roxx_db::Database;
use roxx_types::api::Claims;
use roxx_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a client has to send Identify after the upgrade.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Handle a single WebSocket connection: Identify handshake, Ready, then
/// the event loop until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    // The token may outlive the account or its standing
    let uid = claims.sub.clone();
    let lookup = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || db.get_profile(&uid)).await
    };
    let profile = match lookup {
        Ok(Ok(profile)) if !profile.is_globally_blocked => profile,
        Ok(Ok(_)) => {
            warn!(uid = %claims.sub, "Suspended account tried to connect");
            return;
        }
        Ok(Err(e)) => {
            warn!(uid = %claims.sub, "Gateway identify rejected: {}", e);
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return;
        }
    };

    info!("{} ({}) connected to gateway", profile.name, profile.uid);

    let ready = GatewayEvent::Ready {
        user_id: profile.uid.clone(),
        name: profile.name.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, profile.uid, profile.name).await;
}

async fn run_connection_loop(
    mut sender: WsSender,
    mut receiver: WsReceiver,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    uid: String,
    name: String,
) {
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(&uid).await;

    // Send existing online users to this client so they see who's already here
    let now = Utc::now();
    for (online_uid, _) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: online_uid,
            online: true,
            last_seen: now,
        };
        if !send_event(&mut sender, &event).await {
            dispatcher.unregister_user_channel(&uid, conn_id).await;
            return;
        }
    }

    dispatcher.user_online(&uid, &name, now).await;

    let mut broadcast_rx = dispatcher.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    // None: the dispatcher dropped this connection
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let uid_recv = uid.clone();
    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, &db, &uid_recv, &name_recv, cmd).await,
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} ({}) bad command: {} -- raw: {}", name_recv, uid_recv, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(&uid, conn_id, Utc::now()).await;
    info!("{} ({}) disconnected from gateway", name, uid);
}

async fn wait_for_identify(receiver: &mut WsReceiver, jwt_secret: &str) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

fn verify_token(token: &str, jwt_secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

async fn handle_command(dispatcher: &Dispatcher, db: &Arc<Database>, uid: &str, name: &str, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::StartTyping { chat_id } => {
            let lookup = {
                let db = db.clone();
                let uid = uid.to_string();
                let chat_id = chat_id.clone();
                tokio::task::spawn_blocking(move || db.get_chat(&chat_id, &uid)).await
            };
            let chat = match lookup {
                Ok(Ok(chat)) => chat,
                Ok(Err(e)) => {
                    debug!(uid, chat_id = %chat_id, "Typing ignored: {}", e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            };

            let others = chat.participants.iter().filter(|p| p.as_str() != uid);
            dispatcher
                .send_to_users(
                    others,
                    GatewayEvent::TypingStart {
                        chat_id,
                        user_id: uid.to_string(),
                        name: name.to_string(),
                    },
                )
                .await;
        }
    }
}

async fn send_event(sender: &mut WsSender, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, exp: i64) -> String {
        let claims = Claims {
            sub: "u1".into(),
            name: "ana".into(),
            exp: exp as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn identify_token_is_checked_against_the_secret() {
        let exp = (Utc::now() + chrono::Duration::hours(1)).timestamp();
        let claims = verify_token(&token("s3cret", exp), "s3cret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.name, "ana");

        assert!(verify_token(&token("other", exp), "s3cret").is_none());
        assert!(verify_token("garbage", "s3cret").is_none());
    }

    #[test]
    fn expired_identify_token_is_rejected() {
        let exp = (Utc::now() - chrono::Duration::hours(2)).timestamp();
        assert!(verify_token(&token("s3cret", exp), "s3cret").is_none());
    }
}
