use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    response::Json,
    routing::{get, post},
};
use metrics::counter;
use serde_json::{Map, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::classifier::Classifier;
use crate::emotion;
use crate::error::EmotionError;
use crate::types::{EmotionRequest, EmotionResponse, HealthResponse};

#[derive(Clone)]
pub struct AppState {
    classifier: Arc<dyn Classifier>,
}

impl AppState {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/detect-emotion", post(detect_emotion_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(skip(state, payload))]
async fn detect_emotion_handler(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<EmotionResponse>, EmotionError> {
    counter!("emotion_requests_total").increment(1);

    // Only a JSON object is accepted; any other root is a failure
    let Json(body) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "Rejected request body");
        EmotionError::Failure(rejection.body_text())
    })?;
    let request = EmotionRequest::try_from(body)?;
    tracing::debug!(
        text_len = request.text.as_deref().map_or(0, str::len),
        "Processing emotion request"
    );

    match emotion::detect_emotion(state.classifier.as_ref(), request.text.as_deref()).await {
        Ok(emotion) => {
            tracing::info!(%emotion, "Emotion detected");
            Ok(Json(EmotionResponse { emotion }))
        }
        Err(err) => {
            if let EmotionError::Failure(message) = &err {
                tracing::error!(error = %message, "Emotion detection failed");
            }
            Err(err)
        }
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
