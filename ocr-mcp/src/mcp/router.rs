use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ocr::EngineRegistry;

use super::server::streamable_http_service;

/// Router for the HTTP transport: the MCP service at `mcp_path` plus `GET /health`.
pub fn http_router(registry: Arc<EngineRegistry>, mcp_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mcp_service = streamable_http_service(registry);

    Router::new()
        .route("/health", get(health))
        .nest_service(mcp_path, mcp_service)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "service": "ocr-mcp",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
