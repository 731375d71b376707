use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;

use roxx_db::messages::Posted;
use roxx_types::api::{Claims, ForwardMessageRequest, MarkStatusResponse, SendMessageRequest};
use roxx_types::events::GatewayEvent;
use roxx_types::models::{MessageKind, MessageStatus};

use crate::assistant::{self, prompt_of};
use crate::auth::{AppState, AppStateInner};
use crate::db::run_db;
use crate::error::ApiError;

pub async fn list_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = run_db(&state, move |db| db.list_messages(&chat_id, &claims.sub)).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = match req.kind {
        MessageKind::Text if state.assistant.is_some() => prompt_of(&req.text).map(str::to_string),
        _ => None,
    };
    let asker = claims.sub.clone();

    let posted = run_db(&state, move |db| db.send(&claims.sub, &req, Utc::now())).await?;
    publish_posted(&state, &posted).await;

    if let Some(prompt) = prompt {
        tokio::spawn(assistant::answer(state.clone(), asker, posted.chat.id.clone(), prompt));
    }
    Ok((StatusCode::CREATED, Json(posted.message)))
}

pub async fn forward_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ForwardMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let posted = run_db(&state, move |db| {
        db.forward(&message_id, &req.target_chat_id, &claims.sub, Utc::now())
    })
    .await?;
    publish_posted(&state, &posted).await;
    Ok((StatusCode::CREATED, Json(posted.message)))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    mark(state, chat_id, claims.sub, MessageStatus::Delivered).await
}

pub async fn mark_seen(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    mark(state, chat_id, claims.sub, MessageStatus::Seen).await
}

pub async fn receipts(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let receipts = run_db(&state, move |db| db.receipts(&message_id, &claims.sub)).await?;
    Ok(Json(receipts))
}

async fn mark(
    state: AppState,
    chat_id: String,
    uid: String,
    status: MessageStatus,
) -> Result<Json<MarkStatusResponse>, ApiError> {
    let (cid, reader) = (chat_id.clone(), uid.clone());
    let (advanced, chat) = run_db(&state, move |db| {
        let advanced = match status {
            MessageStatus::Seen => db.mark_seen(&cid, &reader, Utc::now())?,
            _ => db.mark_delivered(&cid, &reader, Utc::now())?,
        };
        // Nothing advanced means there may be no chat record yet
        let chat = if advanced.is_empty() { None } else { Some(db.get_chat(&cid, &reader)?) };
        Ok((advanced, chat))
    })
    .await?;

    if let Some(chat) = chat {
        debug!(chat_id = %chat_id, uid = %uid, count = advanced.len(), "Status {:?} pushed", status);
        state
            .dispatcher
            .send_to_users(
                &chat.participants,
                GatewayEvent::MessageStatus {
                    chat_id,
                    user_id: uid,
                    status,
                    message_ids: advanced.clone(),
                },
            )
            .await;
    }

    Ok(Json(MarkStatusResponse {
        updated: advanced.len(),
    }))
}

/// Push a freshly stored message and the chat it refreshed to everyone in
/// the chat.
pub(crate) async fn publish_posted(state: &AppStateInner, posted: &Posted) {
    let participants = &posted.chat.participants;
    state
        .dispatcher
        .send_to_users(
            participants,
            GatewayEvent::MessageCreate {
                chat_id: posted.chat.id.clone(),
                message: posted.message.clone(),
            },
        )
        .await;
    state
        .dispatcher
        .send_to_users(
            participants,
            GatewayEvent::ChatUpdate {
                chat: posted.chat.clone(),
            },
        )
        .await;
}
