use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use stipple_core::{encode_png, GenerationRequest};
use stipple_storage::keys::{image_key_stem, GENERATED_IMAGES_PREFIX};
use stipple_storage::{BlobRef, ObjectPath};
use tokio::time::timeout;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::{ApiError, AppState};

/// Denoising steps per image. Fixed for every request.
pub const INFERENCE_STEPS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub status: String,
    pub image_url: String,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Build the router serving `/generate-image` and `/health`.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/generate-image", post(generate_image_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn generate_image_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<GenerationResult>, ApiError> {
    match generate_image(&req.prompt, &state).await {
        Ok(blob) => {
            let image_url = blob.public_url(&state.public_url_base);
            info!(key = %blob.key, "image stored");
            Ok(Json(GenerationResult {
                status: "success".to_string(),
                image_url,
                prompt: req.prompt,
            }))
        }
        Err(e) => {
            error!(error = ?e, "Error generating image");
            Err(ApiError::generation(&e))
        }
    }
}

/// Always healthy once the server is accepting connections. Does not look
/// at the model or the bucket.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Generates an image for `prompt` with the shared model and stores it
/// under `generated_images/`.
pub async fn generate_image(prompt: &str, state: &AppState) -> Result<BlobRef> {
    if prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }

    let _permit = timeout(state.queue_timeout, state.generation_slot.acquire())
        .await
        .map_err(|_| {
            anyhow!(
                "timed out after {}s waiting for the model",
                state.queue_timeout.as_secs_f32()
            )
        })?
        .context("generation queue closed")?;

    let model = Arc::clone(&state.model);
    let request = GenerationRequest::new(prompt, INFERENCE_STEPS);
    let started = Instant::now();
    let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut model = model.lock().unwrap_or_else(|poisoned| {
            warn!("model lock poisoned by an earlier panic, reusing it");
            poisoned.into_inner()
        });
        let image = model.run(request)?;
        encode_png(&image)
    })
    .await
    .context("generation task failed")??;
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        bytes = png.len(),
        "image generated"
    );

    let stem = image_key_stem(prompt, (state.clock)());
    let blob = state
        .bucket
        .put_object_unique(
            &ObjectPath::from(GENERATED_IMAGES_PREFIX),
            &stem,
            "png",
            png,
            "image/png",
        )
        .await?;
    Ok(blob)
}
