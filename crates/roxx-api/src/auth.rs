use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};

use roxx_db::Database;
use roxx_gateway::Dispatcher;
use roxx_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};

use crate::assistant::SharedAssistant;
use crate::db::run_db;
use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// Answers `/ai` messages when configured.
    pub assistant: Option<SharedAssistant>,
}

/// Tokens are valid for 30 days.
const TOKEN_LIFETIME_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| {
        db.register(&req.email, &req.password, req.name.as_deref(), Utc::now())
    })
    .await?;

    let token = create_token(&state.jwt_secret, &profile.uid, &profile.name, Utc::now())?;
    Ok((StatusCode::CREATED, Json(AuthResponse { profile, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.authenticate(&req.email, &req.password, Utc::now())).await?;

    let token = create_token(&state.jwt_secret, &profile.uid, &profile.name, Utc::now())?;
    Ok(Json(AuthResponse { profile, token }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    run_db(&state, move |db| db.sign_out(&claims.sub, Utc::now())).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn create_token(
    secret: &str,
    uid: &str,
    name: &str,
    now: DateTime<Utc>,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: uid.to_string(),
        name: name.to_string(),
        exp: (now + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Internal(format!("token encoding failed: {e}")))
}
