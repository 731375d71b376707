use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use roxx_types::api::{Claims, LikeResponse, PostStoryRequest, StoryReplyRequest, ViewResponse};
use roxx_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::db::run_db;
use crate::error::ApiError;
use crate::messages::publish_posted;

pub async fn post_story(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostStoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let story = run_db(&state, move |db| {
        db.post_story(&claims.sub, &req.media_url, req.media_type, req.caption.as_deref(), Utc::now())
    })
    .await?;

    state.dispatcher.broadcast(GatewayEvent::StoryUpdate {
        story_id: story.id.clone(),
        removed: false,
    });
    Ok((StatusCode::CREATED, Json(story)))
}

/// Stories posted within the visibility window, oldest first.
pub async fn list_stories(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let stories = run_db(&state, |db| db.list_stories(Utc::now())).await?;
    Ok(Json(stories))
}

pub async fn delete_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = story_id.clone();
    run_db(&state, move |db| db.delete_story(&sid, &claims.sub)).await?;

    state.dispatcher.broadcast(GatewayEvent::StoryUpdate {
        story_id,
        removed: true,
    });
    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_view(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = story_id.clone();
    let recorded = run_db(&state, move |db| db.record_view(&sid, &claims.sub, Utc::now())).await?;

    if recorded {
        state.dispatcher.broadcast(GatewayEvent::StoryUpdate {
            story_id,
            removed: false,
        });
    }
    Ok(Json(ViewResponse { recorded }))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = story_id.clone();
    let liked = run_db(&state, move |db| db.toggle_like(&sid, &claims.sub)).await?;

    state.dispatcher.broadcast(GatewayEvent::StoryUpdate {
        story_id,
        removed: false,
    });
    Ok(Json(LikeResponse { liked }))
}

pub async fn reply_to_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StoryReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let posted = run_db(&state, move |db| {
        db.reply_to_story(&story_id, &claims.sub, &req.text, Utc::now())
    })
    .await?;
    publish_posted(&state, &posted).await;
    Ok((StatusCode::CREATED, Json(posted.message)))
}
