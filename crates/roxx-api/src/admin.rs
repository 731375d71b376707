use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;

use roxx_types::api::{Claims, DeleteUserResponse};

use crate::auth::AppState;
use crate::db::run_db;
use crate::error::ApiError;

// The store re-reads the caller's record for every admin operation, so a
// revoked admin loses access before their token expires.

pub async fn list_all(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let users = run_db(&state, move |db| db.list_all(&claims.sub)).await?;
    Ok(Json(users))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = run_db(&state, move |db| db.stats(&claims.sub)).await?;
    Ok(Json(stats))
}

pub async fn toggle_block(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.toggle_global_block(&claims.sub, &uid, Utc::now())).await?;
    Ok(Json(profile))
}

pub async fn toggle_admin(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.toggle_admin_access(&claims.sub, &uid)).await?;
    Ok(Json(profile))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = run_db(&state, move |db| db.delete_user(&claims.sub, &uid)).await?;
    Ok(Json(DeleteUserResponse { deleted }))
}
