use serde::{Deserialize, Serialize};

/// An image as submitted by the client, resolved once at the endpoint boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    /// Raw bytes of a multipart `image` field plus its declared content type.
    FileUpload {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    /// Base64 text from the JSON `image_data` key, optionally a data URL.
    Base64Image(String),
}

/// JSON variant of the predict request body.
#[derive(Debug, Deserialize)]
pub struct Base64Request {
    pub image_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    #[serde(rename = "class")]
    pub class_label: &'static str,
    pub confidence: f32,
    pub class_index: usize,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub status: &'static str,
    pub prediction: PredictionResult,
}

impl PredictionResponse {
    pub fn success(prediction: PredictionResult) -> Self {
        Self {
            status: "success",
            prediction,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct ClassesResponse {
    pub classes: &'static [&'static str],
    pub total_classes: usize,
}
