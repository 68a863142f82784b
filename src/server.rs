use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    error::ServiceError,
    pipeline::{GenerationRequest, Pipeline, PipelineResponse},
    worker::PoolStatus,
};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    let state = AppState { pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/pools", get(pools))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<PipelineResponse>, ServiceError> {
    let Json(request) = body.map_err(|rejection| ServiceError::BadRequest(rejection.body_text()))?;
    info!(url = %request.url, mode = %request.mode, "generation requested");
    let response = state.pipeline.run(&request).await?;
    Ok(Json(response))
}

async fn pools(State(state): State<AppState>) -> Json<Vec<PoolStatus>> {
    Json(state.pipeline.pool_statuses())
}
