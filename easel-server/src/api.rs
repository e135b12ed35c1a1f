use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Json, State},
    routing::{get, post},
    Router,
};
use easel_core::{GenerationRequest, GenerationResult, Inference};
use serde::Serialize;
use tracing::error;

use crate::error::ApiError;

// Application state containing the preloaded model.
#[derive(Clone)]
pub struct AppState(pub Inference);

#[derive(Serialize)]
struct HealthResponse {
    state: &'static str,
    gpu: bool,
}

// Base64 reference images of a few megapixels exceed axum's 2 MB default.
const REQUEST_BODY_LIMIT_BYTES: usize = 32 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            post(inference_handler).layer(DefaultBodyLimit::max(REQUEST_BODY_LIMIT_BYTES)),
        )
        .route("/healthcheck", get(healthcheck_handler))
        .with_state(state)
}

async fn healthcheck_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        state: "healthy",
        gpu: state.0.handle().is_accelerated(),
    })
}

/// Runs the request on the blocking pool; the model handle serializes
/// concurrent generations.
async fn inference_handler(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResult>, ApiError> {
    let Json(req) = payload?;
    let inference = state.0.clone();
    let result = tokio::task::spawn_blocking(move || inference.infer(req))
        .await
        .map_err(|e| ApiError::internal(format!("inference task failed: {e}")))?;

    match result {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            error!(kind = ?e.kind(), "error generating image: {e}");
            Err(e.into())
        }
    }
}
