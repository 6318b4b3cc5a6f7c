use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::{error, warn};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Failures turning client-supplied bytes into pixels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Image payload is empty")]
    Empty,
    #[error("Invalid base64 image data: {0}")]
    InvalidBase64(String),
    #[error("Unsupported image format")]
    UnsupportedFormat,
    /// Decoded size would exceed the configured dimension or allocation caps.
    #[error("Image too large: {0}")]
    TooLarge(String),
    /// The container was recognized but its pixel data could not be decoded.
    #[error("Failed to decode image: {0}")]
    Corrupt(String),
}

/// An array that does not satisfy the classifier's input contract.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("Expected tensor shape {expected:?}, got {actual:?}")]
    Shape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Tensor element {0} outside [0, 1]")]
    Range(f32),
}

/// Failures of the classifier adapter.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model not loaded")]
    Unavailable,
    #[error("Failed to load model from {path}: {message}")]
    Load { path: String, message: String },
    #[error("Model outputs {actual} classes but the label table has {expected}")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Everything the endpoint layer can answer with instead of a prediction.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No image provided")]
    NoImage,
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),
    #[error("Invalid multipart body: {0}")]
    Multipart(String),
    #[error("Failed to read request body: {0}")]
    Payload(String),
    #[error("Upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Model not loaded")]
    ModelUnavailable,
    #[error("{0}")]
    Inference(String),
    /// Label table and model output disagree; a defect, not a client problem.
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
    #[error("Worker pool failure: {0}")]
    Blocking(String),
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unavailable => ServiceError::ModelUnavailable,
            ModelError::OutputMismatch { .. } => ServiceError::InternalInconsistency(err.to_string()),
            ModelError::Load { .. } | ModelError::Inference(_) => {
                ServiceError::Inference(err.to_string())
            }
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NoImage
            | ServiceError::InvalidJson(_)
            | ServiceError::Multipart(_)
            | ServiceError::Payload(_)
            | ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Inference(_)
            | ServiceError::InternalInconsistency(_)
            | ServiceError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("predict failed ({}): {}", status.as_u16(), self);
        } else {
            warn!("predict rejected ({}): {}", status.as_u16(), self);
        }
        HttpResponse::build(status).json(ErrorResponse::new(self.to_string()))
    }
}
