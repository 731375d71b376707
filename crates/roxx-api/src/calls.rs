use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use roxx_types::api::{Claims, InitiateCallRequest, UpdateCallRequest};
use roxx_types::events::GatewayEvent;
use roxx_types::models::CallSession;

use crate::auth::{AppState, AppStateInner};
use crate::db::run_db;
use crate::error::ApiError;

pub async fn initiate_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InitiateCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let call = run_db(&state, move |db| {
        db.initiate_call(&claims.sub, &req.receiver_id, req.kind, Utc::now())
    })
    .await?;
    publish_call(&state, &call).await;
    Ok((StatusCode::CREATED, Json(call)))
}

/// The newest call still ringing for the caller, or `null`.
pub async fn incoming_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Option<CallSession>>, ApiError> {
    let call = run_db(&state, move |db| db.incoming_call(&claims.sub, Utc::now())).await?;
    Ok(Json(call))
}

pub async fn get_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let call = run_db(&state, move |db| db.get_call(&call_id, &claims.sub)).await?;
    Ok(Json(call))
}

pub async fn update_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let call = run_db(&state, move |db| {
        db.update_call_status(&call_id, &claims.sub, req.status, Utc::now())
    })
    .await?;
    publish_call(&state, &call).await;
    Ok(Json(call))
}

async fn publish_call(state: &AppStateInner, call: &CallSession) {
    let parties = [call.caller_id.clone(), call.receiver_id.clone()];
    state
        .dispatcher
        .send_to_users(&parties, GatewayEvent::CallUpdate { call: call.clone() })
        .await;
}
