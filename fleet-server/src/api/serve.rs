use axum::http::{Method, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::ws::ws_handler;
use crate::response::ServerResult;
use crate::util::app_state::AppState;

async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": chrono::Utc::now().to_rfc3339() }))
}

/// Builds the application router. Split out from `serve` so tests can
/// mount it on an ephemeral listener.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("sec-websocket-protocol"),
        ]);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(get_health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState) -> ServerResult<()> {
    let addr = (state.config.bind_host.clone(), state.config.bind_port);
    let listener = TcpListener::bind(addr).await?;
    info!(
        "listening on {}:{}",
        state.config.bind_host, state.config.bind_port
    );

    axum::serve(listener, app(state)).await?;
    Ok(())
}
