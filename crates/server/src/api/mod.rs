use crate::config::AppState;
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use toolrpc_mcp::protocol::{ListToolsResult, INTERNAL_ERROR, PARSE_ERROR};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod sse;

/// Start the SSE server and run until `shutdown` resolves
pub async fn serve(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = state.config.bind_addr();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("SSE server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let sse_path = state.config.sse.sse_path.clone();
    let message_path = state.config.sse.message_path.clone();

    Router::new()
        // Protocol routes
        .route(&sse_path, get(sse::stream_endpoint))
        .route(&message_path, post(sse::post_message))
        .route("/mcp", post(post_json))
        // Informational routes
        .route("/tools", get(list_tools))
        .route("/health", get(health_check))
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Plain JSON-RPC endpoint without SSE framing
async fn post_json(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let response = state.dispatcher.handle_raw(&body).await;
    let status = match response.error.as_ref().map(|e| e.code) {
        Some(PARSE_ERROR) => StatusCode::BAD_REQUEST,
        Some(INTERNAL_ERROR) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    (status, Json(response))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ListToolsResult {
        tools: state.dispatcher.registry().list(),
    })
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "server": state.config.name,
        "version": state.config.version,
        "type": state.config.transport.to_string(),
        "tools_count": state.dispatcher.registry().len(),
    }))
}
