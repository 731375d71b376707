mod cleanup;
mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use roxx_api::assistant::{HttpAssistant, SharedAssistant};
use roxx_api::auth::{AppState, AppStateInner};
use roxx_db::Database;
use roxx_gateway::{Dispatcher, bridge, connection};

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roxx=debug,roxx_api=debug,roxx_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env();
    if config.uses_dev_secret() {
        warn!("Tokens are signed with the development secret; set ROXX_JWT_SECRET in production");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path, config.limits.clone())?);

    if let Some(admin) = config.admin.clone() {
        let seed_db = db.clone();
        tokio::task::spawn_blocking(move || {
            seed_db.seed_bootstrap_admin(&admin.email, &admin.password, &admin.name, Utc::now())
        })
        .await??;
    }

    let assistant = match &config.assistant {
        Some(endpoint) => {
            info!(url = %endpoint.url, "Chat assistant enabled");
            let http = HttpAssistant::new(endpoint.url.clone(), endpoint.api_key.clone())?;
            Some(Arc::new(http) as SharedAssistant)
        }
        None => None,
    };

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        assistant,
    });
    let gateway_state = GatewayState {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret: config.jwt_secret.clone(),
    };

    // Background tasks
    tokio::spawn(bridge::relay_auth_events(db.auth_events().subscribe(), dispatcher));
    tokio::spawn(cleanup::run_call_gc_loop(db.clone(), config.call_gc_interval));

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = roxx_api::router(app_state).merge(ws_route).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    info!("Roxx server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret))
}
