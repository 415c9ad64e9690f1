use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{GenerateRequest, GenerateResponse, Pipeline, RunRequest, RunResponse},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
}

pub fn build_router(config: Arc<AppConfig>, pipeline: Arc<Pipeline>) -> Router {
    let state = AppState { config, pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/run", post(run))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    let Json(request) = payload?;
    let params = request.params(&state.config.default_params());

    let generation = state.pipeline.generate(request.prompt, params).await?;
    debug!(
        prompt_tokens = generation.prompt_tokens,
        generated_tokens = generation.generated_tokens,
        "generate finished"
    );

    Ok(Json(GenerateResponse {
        completion: generation.text,
    }))
}

/// Prompt-only variant of `/generate` using the configured defaults.
async fn run(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, ServiceError> {
    let Json(request) = payload?;

    let generation = state
        .pipeline
        .generate(request.prompt, state.config.default_params())
        .await?;
    debug!(
        prompt_tokens = generation.prompt_tokens,
        generated_tokens = generation.generated_tokens,
        "run finished"
    );

    Ok(Json(RunResponse {
        output: generation.text,
    }))
}
