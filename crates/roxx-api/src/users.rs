use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use roxx_types::api::{Claims, UpdateProfileRequest};

use crate::auth::AppState;
use crate::db::run_db;
use crate::error::ApiError;

/// Directory for ordinary clients: suspended accounts and users the caller
/// blocked are left out, the caller included.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let users = run_db(&state, move |db| db.list_directory(&claims.sub)).await?;
    Ok(Json(users))
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.get_profile(&claims.sub)).await?;
    Ok(Json(profile))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = run_db(&state, move |db| db.get_user(&claims.sub, &uid)).await?;
    Ok(Json(user))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.update_profile(&claims.sub, &req)).await?;
    Ok(Json(profile))
}

pub async fn block_user(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.set_block(&claims.sub, &target, true)).await?;
    Ok(Json(profile))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.set_block(&claims.sub, &target, false)).await?;
    Ok(Json(profile))
}
