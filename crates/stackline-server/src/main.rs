mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderValue, Method, header},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use stackline_api::auth::hash_password;
use stackline_api::google::GoogleVerifier;
use stackline_api::{AppState, AppStateInner};
use stackline_db::Database;
use stackline_gateway::connection;
use stackline_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stackline=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Database::open(&config.db_path)?;
    if let Some(admin) = &config.admin {
        let hash = hash_password(admin.password.clone())
            .await
            .map_err(|e| anyhow::anyhow!("hashing admin password: {}", e))?;
        db.ensure_admin(&Uuid::new_v4().to_string(), &admin.email, &hash)?;
    }

    let google = match &config.google_client_id {
        Some(client_id) => Some(GoogleVerifier::new(client_id.clone())),
        None => {
            warn!("GOOGLE_CLIENT_ID not set, Google sign-in disabled");
            None
        }
    };

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: Dispatcher::new(),
        google,
    });

    let socket_route = Router::new()
        .route("/api/socket", get(ws_upgrade))
        .with_state(state.clone());

    let app = stackline_api::router(state)
        .merge(socket_route)
        .layer(cors_layer(config.allowed_origin.as_deref())?)
        .layer(TraceLayer::new_for_http());

    info!("Stackline server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn cors_layer(allowed_origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = allowed_origin else {
        warn!("STACKLINE_ALLOWED_ORIGIN not set, CORS is permissive");
        return Ok(CorsLayer::permissive());
    };

    let origin: HeaderValue = origin.parse()?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[derive(Debug, Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

/// A token in the query is checked before upgrading; without one the socket
/// must identify itself after connecting.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    connection::upgrade(
        ws,
        state.dispatcher.clone(),
        &state.jwt_secret,
        query.token.as_deref(),
    )
}
