//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::{handlers, models::{ApiResponse, NearQuery, SearchQuery}};
use crate::processing::VideoIndexer;

/// Uploads larger than this are rejected
const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub indexer: VideoIndexer,
}

/// Build the application router
pub fn router(indexer: VideoIndexer) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/api/videos", get(list_videos_handler))
        .route("/api/search", get(search_handler))
        .route("/api/videos/:name/near", get(near_handler))
        .route("/api/videos/:name/timestamps", get(timestamps_handler))
        .route("/api/videos/:name/stats", get(stats_handler))
        .route("/api/videos/:name/process", post(process_handler))
        .route("/api/reset", post(reset_handler))
        .with_state(AppState { indexer })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}

/// Configure and start the HTTP server
pub async fn start_http_server(indexer: VideoIndexer, port: u16) -> Result<()> {
    let app = router(indexer);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("🌐 API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn respond(result: Result<serde_json::Value>, error_status: StatusCode) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => (error_status, Json(ApiResponse::<()>::error(e.to_string()))).into_response(),
    }
}

async fn health_handler() -> Response {
    respond(handlers::health_check().await, StatusCode::INTERNAL_SERVER_ERROR)
}

async fn list_videos_handler(State(state): State<AppState>) -> Response {
    respond(handlers::list_videos(&state.indexer).await, StatusCode::INTERNAL_SERVER_ERROR)
}

async fn search_handler(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    respond(
        handlers::search(&state.indexer, &query.q, query.group).await,
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

async fn near_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<NearQuery>,
) -> Response {
    respond(
        handlers::records_near(&state.indexer, &name, &query.t, query.tolerance).await,
        StatusCode::BAD_REQUEST,
    )
}

async fn timestamps_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    respond(handlers::timestamps(&state.indexer, &name).await, StatusCode::INTERNAL_SERVER_ERROR)
}

async fn stats_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    respond(handlers::stats(&state.indexer, &name).await, StatusCode::INTERNAL_SERVER_ERROR)
}

async fn process_handler(State(state): State<AppState>, Path(name): Path<String>, body: Bytes) -> Response {
    respond(
        handlers::process_upload(&state.indexer, &name, &body).await,
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

async fn reset_handler(State(state): State<AppState>) -> Response {
    respond(handlers::reset(&state.indexer).await, StatusCode::INTERNAL_SERVER_ERROR)
}
