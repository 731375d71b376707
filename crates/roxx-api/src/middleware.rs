use axum::{
    RequestExt,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use roxx_db::StoreError;
use roxx_types::api::Claims;

use crate::auth::AppState;
use crate::db::run_db;
use crate::error::ApiError;

/// Validate the bearer JWT and make its [`Claims`] available to handlers.
/// Tokens of deleted or suspended accounts are refused.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = req
        .extract_parts::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    let claims = decode_claims(bearer.token(), &state.jwt_secret)?;

    let uid = claims.sub.clone();
    let profile = run_db(&state, move |db| db.get_profile(&uid))
        .await
        .map_err(|e| match e {
            ApiError::Store(StoreError::NotFound(_)) => ApiError::Unauthorized,
            other => other,
        })?;
    if profile.is_globally_blocked {
        debug!(uid = %profile.uid, "Suspended account refused");
        return Err(StoreError::Suspended.into());
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub(crate) fn decode_claims(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}
