use crate::{landmarks::HolisticDetection, model_service::ModelError, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

/// Upper bound on the base64 payload, matching a ~7.5MB image.
const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct FrameRequest {
    /// Base64-encoded image bytes (JPEG, PNG or WebP).
    #[serde(default)]
    pub frame: Option<String>,
}

#[derive(Error, Debug)]
pub enum ProcessFrameError {
    #[error("`frame` is required and must be non-empty")]
    MissingFrame,
    #[error("`frame` exceeds the maximum size of {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge,
    #[error("`frame` is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("`frame` is not a decodable image: {0}")]
    ImageDecode(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl ProcessFrameError {
    fn code(&self) -> &'static str {
        match self {
            ProcessFrameError::MissingFrame => "missing_frame",
            ProcessFrameError::FrameTooLarge => "frame_too_large",
            ProcessFrameError::InvalidBase64(_) => "invalid_base64",
            ProcessFrameError::ImageDecode(_) => "image_decode_failed",
            ProcessFrameError::Inference(_) => "inference_failed",
        }
    }
}

impl From<ModelError> for ProcessFrameError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::ImageDecode(e) => ProcessFrameError::ImageDecode(e),
            ModelError::Inference(e) => ProcessFrameError::Inference(e),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ProcessFrameError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ProcessFrameError::Inference(detail) => {
                // Internal detail stays in the logs.
                tracing::error!("Inference failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "inference failed".to_string(),
                )
            }
            _ => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        (
            status,
            Json(ErrorBody {
                error: self.code().to_string(),
                message,
            }),
        )
            .into_response()
    }
}

#[instrument(skip(state, request))]
pub async fn process_frame(
    State(state): State<SharedState>,
    Json(request): Json<FrameRequest>,
) -> Result<Json<HolisticDetection>, ProcessFrameError> {
    state.metrics.record_request("/process");

    let frame = match request.frame {
        Some(frame) if !frame.is_empty() => frame,
        _ => return Err(ProcessFrameError::MissingFrame),
    };
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProcessFrameError::FrameTooLarge);
    }

    let image_data = STANDARD
        .decode(frame.as_bytes())
        .map_err(|e| ProcessFrameError::InvalidBase64(e.to_string()))?;

    let start = Instant::now();
    let detection = state.model.detect(image_data).await?;
    state
        .metrics
        .record_inference_duration(start.elapsed().as_millis() as u64, "/process");

    if detection.is_empty() {
        tracing::debug!("No landmark group above its presence threshold");
    }

    Ok(Json(detection))
}
