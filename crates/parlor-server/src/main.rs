mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parlor_api::auth::{self, AppState, AppStateInner};
use parlor_api::profile;
use parlor_db::{Database, Store};
use parlor_gateway::connection;
use parlor_gateway::{Dispatcher, Hub};

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    hub: Hub,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor_server=debug,parlor_gateway=debug,parlor_api=debug,parlor_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(config.public_dir.join("pfps")).await?;

    // Init database
    let store = Store::new(Database::open(&config.db_path)?);

    // Shared state
    let hub = Hub::new(store.clone(), Dispatcher::new(), config.hub.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        store,
        jwt_secret: config.jwt_secret.clone(),
        owner_emails: config.owner_emails.clone(),
        public_dir: config.public_dir.clone(),
    });

    let state = ServerState {
        hub,
        jwt_secret: config.jwt_secret.clone(),
    };

    // Routes
    let identity_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/set-role", post(auth::set_role))
        .route(
            "/update-profile",
            post(profile::update_profile)
                .layer(DefaultBodyLimit::max(profile::MAX_AVATAR_SIZE + 64 * 1024)),
        )
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(identity_routes)
        .merge(ws_route)
        .fallback_service(ServeDir::new(&config.public_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parlor server listening on {}", addr);
    info!(
        "Broadcast scope {:?}, failure acks {}",
        config.hub.scope,
        if config.hub.acknowledge_failures { "on" } else { "off" }
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// GET /gateway[?token=...]: a valid token binds the session to its user;
/// an invalid one is refused.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match query.token.as_deref() {
        Some(token) => match auth::verify_token(&state.jwt_secret, token) {
            Some(claims) => Some(claims.sub),
            None => {
                warn!("Gateway upgrade with invalid token refused");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.hub, user_id))
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
