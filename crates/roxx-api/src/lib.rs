pub mod admin;
pub mod assistant;
pub mod auth;
pub mod calls;
pub mod chats;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod stories;
pub mod users;

mod db;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// REST surface. Everything except registration, login and the health
/// check needs a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        // Users
        .route("/users", get(users::list_users))
        .route("/users/me", get(users::get_me).patch(users::update_me))
        .route("/users/me/blocks/{uid}", put(users::block_user).delete(users::unblock_user))
        .route("/users/{uid}", get(users::get_user))
        // Admin
        .route("/admin/users", get(admin::list_all))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/users/{uid}", axum::routing::delete(admin::delete_user))
        .route("/admin/users/{uid}/block", post(admin::toggle_block))
        .route("/admin/users/{uid}/admin", post(admin::toggle_admin))
        // Chats
        .route("/chats", get(chats::list_chats))
        .route("/chats/groups", post(chats::create_group))
        .route("/chats/unlock", post(chats::unlock_chats))
        .route("/chats/private/{uid}", get(chats::private_chat))
        .route("/chats/{chat_id}", get(chats::get_chat))
        .route("/chats/{chat_id}/lock", post(chats::toggle_lock))
        // Messages
        .route("/chats/{chat_id}/messages", get(messages::list_messages))
        .route("/chats/{chat_id}/delivered", post(messages::mark_delivered))
        .route("/chats/{chat_id}/seen", post(messages::mark_seen))
        .route("/messages", post(messages::send_message))
        .route("/messages/{message_id}/forward", post(messages::forward_message))
        .route("/messages/{message_id}/receipts", get(messages::receipts))
        // Calls
        .route("/calls", post(calls::initiate_call))
        .route("/calls/incoming", get(calls::incoming_call))
        .route("/calls/{call_id}", get(calls::get_call).patch(calls::update_call))
        // Stories
        .route("/stories", get(stories::list_stories).post(stories::post_story))
        .route("/stories/{story_id}", axum::routing::delete(stories::delete_story))
        .route("/stories/{story_id}/views", post(stories::record_view))
        .route("/stories/{story_id}/like", post(stories::toggle_like))
        .route("/stories/{story_id}/replies", post(stories::reply_to_story))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use roxx_db::{Database, Limits};
    use roxx_gateway::Dispatcher;

    use super::*;
    use crate::auth::AppStateInner;

    fn app() -> (Router, AppState) {
        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory(Limits::default()).unwrap()),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            assistant: None,
        });
        (router(state.clone()), state)
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(app: &Router, name: &str) -> (String, String) {
        let (status, body) = call(
            app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "email": format!("{name}@example.com"), "password": "password123", "name": name })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["profile"]["uid"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn private_conversation_round_trip() {
        let (app, _) = app();
        let (a_uid, a_token) = register(&app, "ana").await;
        let (b_uid, b_token) = register(&app, "bea").await;

        let (status, sent) = call(
            &app,
            "POST",
            "/messages",
            Some(&a_token),
            Some(json!({ "recipientId": b_uid, "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sent["status"], "sent");
        assert_eq!(sent["type"], "text");

        let (_, id) = call(&app, "GET", &format!("/chats/private/{a_uid}"), Some(&b_token), None).await;
        let chat_id = id["chatId"].as_str().unwrap().to_string();

        let (status, chats) = call(&app, "GET", "/chats", Some(&b_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chats[0]["id"], chat_id.as_str());
        assert_eq!(chats[0]["lastMessage"]["text"], "hi");

        let (status, marked) = call(&app, "POST", &format!("/chats/{chat_id}/seen"), Some(&b_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(marked["updated"], 1);

        let (_, messages) = call(&app, "GET", &format!("/chats/{chat_id}/messages"), Some(&a_token), None).await;
        assert_eq!(messages.as_array().unwrap().len(), 1);
        assert_eq!(messages[0]["status"], "seen");
    }

    #[tokio::test]
    async fn errors_use_the_json_envelope() {
        let (app, _) = app();

        let (status, _) = call(&app, "GET", "/chats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, "GET", "/chats", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (_, token) = register(&app, "ana").await;
        let (status, body) = call(&app, "GET", "/users/nobody", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = call(
            &app,
            "POST",
            "/chats/groups",
            Some(&token),
            Some(json!({ "name": "  ", "memberIds": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_argument");

        let (status, body) = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "email": "ana@example.com", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_exists");
    }

    #[tokio::test]
    async fn deleted_account_token_stops_working() {
        let (app, state) = app();
        let (uid, token) = register(&app, "ana").await;

        let (status, _) = call(&app, "GET", "/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        state
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM users WHERE uid = ?1", [&uid])?))
            .unwrap();

        let (status, _) = call(&app, "GET", "/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
