use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use roxx_types::api::{Claims, CreateGroupRequest, PrivateChatIdResponse, UnlockChatsRequest};
use roxx_types::events::GatewayEvent;
use roxx_types::models::private_chat_id;

use crate::auth::AppState;
use crate::db::run_db;
use crate::error::ApiError;

/// The caller's chats, most recently active first. Hiding the ones in
/// `lockedBy` is up to the client.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = run_db(&state, move |db| db.list_my_chats(&claims.sub)).await?;
    Ok(Json(chats))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = run_db(&state, move |db| db.get_chat(&chat_id, &claims.sub)).await?;
    Ok(Json(chat))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = run_db(&state, move |db| {
        db.create_group(&req.name, &req.member_ids, &claims.sub, req.group_icon.as_deref(), Utc::now())
    })
    .await?;

    state
        .dispatcher
        .send_to_users(&chat.participants, GatewayEvent::ChatUpdate { chat: chat.clone() })
        .await;

    Ok((StatusCode::CREATED, Json(chat)))
}

/// Deterministic id of the private chat with `other`; nothing is created.
pub async fn private_chat(
    Path(other): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Json<PrivateChatIdResponse> {
    Json(PrivateChatIdResponse {
        chat_id: private_chat_id(&claims.sub, &other),
    })
}

pub async fn toggle_lock(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.clone();
    let chat = run_db(&state, move |db| db.toggle_lock(&chat_id, &uid)).await?;

    // Lock state is personal, only the caller's other sessions care
    state
        .dispatcher
        .send_to_user(&claims.sub, GatewayEvent::ChatUpdate { chat: chat.clone() })
        .await;

    Ok(Json(chat))
}

pub async fn unlock_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UnlockChatsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = run_db(&state, move |db| db.unlock_chats(&claims.sub, &req.passcode)).await?;
    Ok(Json(chats))
}
