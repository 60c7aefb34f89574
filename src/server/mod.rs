//! HTTP relay server.
//!
//! Exposes the chat relay over two endpoints:
//! - GET  /api/status - health check
//! - POST /api/chat   - conversation in, UI-message SSE stream out

mod chat;

pub use chat::ChatRequest;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::RelayConfig;

/// Stream protocol marker, set on every response so browser SDK clients
/// recognize the event framing.
pub const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const STREAM_PROTOCOL_VERSION: &str = "v1";

/// Max request body size. Conversations replay completed image parts with
/// their base64 payloads, so bodies run far past typical JSON sizes.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let protocol_header = SetResponseHeaderLayer::if_not_present(
        header::HeaderName::from_static(STREAM_PROTOCOL_HEADER),
        HeaderValue::from_static(STREAM_PROTOCOL_VERSION),
    );

    // Bounds the request phase (body read included); streaming responses
    // are not affected once headers are out.
    let request_timeout =
        TimeoutLayer::new(Duration::from_secs(state.config.stream_timeout_secs));

    Router::new()
        .route("/api/status", get(status_handler))
        .route(
            "/api/chat",
            post(chat::chat_handler).layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .layer(request_timeout)
        .layer(protocol_header)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Run the HTTP server until it is shut down.
pub async fn run(config: RelayConfig) -> Result<()> {
    let addr = std::net::SocketAddr::new(config.host.parse()?, config.port);
    let app = create_router(AppState::new(config));

    info!("relay listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
