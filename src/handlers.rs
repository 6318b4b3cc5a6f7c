use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use log::{debug, info};
use std::time::Instant;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::error::ServiceError;
use crate::models::{
    Base64Request, ClassesResponse, HealthResponse, PredictionResponse, RequestPayload,
};
use crate::pipeline::Pipeline;

/// Multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "image";

/// Shared, read-only state handed to every worker.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/classes").route(web::get().to(classes)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

/// Cross-origin requests are allowed from anywhere.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        model_loaded: state.pipeline.model_loaded(),
    })
}

pub async fn classes(state: web::Data<AppState>) -> HttpResponse {
    let labels = state.pipeline.labels();
    HttpResponse::Ok().json(ClassesResponse {
        classes: labels,
        total_classes: labels.len(),
    })
}

pub async fn predict(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServiceError> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    if !state.pipeline.model_loaded() {
        return Err(ServiceError::ModelUnavailable);
    }

    let payload = read_payload(&req, body, state.max_upload_bytes).await?;
    debug!("[{}] payload received: {}", request_id, describe(&payload));

    let worker_state = state.clone();
    let prediction = web::block(move || worker_state.pipeline.run(payload))
        .await
        .map_err(|e| ServiceError::Blocking(e.to_string()))??;

    info!(
        "[{}] predicted {} (index {}, confidence {:.4}) in {:.2?}",
        request_id,
        prediction.class_label,
        prediction.class_index,
        prediction.confidence,
        started.elapsed()
    );
    Ok(HttpResponse::Ok().json(PredictionResponse::success(prediction)))
}

/// Resolves the request body into exactly one payload variant: a multipart
/// `image` field or a JSON `image_data` string.
async fn read_payload(
    req: &HttpRequest,
    body: web::Payload,
    limit: usize,
) -> Result<RequestPayload, ServiceError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();

    if content_type == "multipart/form-data" {
        read_multipart(Multipart::new(req.headers(), body), limit).await
    } else if content_type == "application/json" || content_type.ends_with("+json") {
        let bytes = read_body(body, limit).await?;
        let request: Base64Request = serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::InvalidJson(e.to_string()))?;
        request
            .image_data
            .map(RequestPayload::Base64Image)
            .ok_or(ServiceError::NoImage)
    } else {
        Err(ServiceError::NoImage)
    }
}

async fn read_multipart(
    mut multipart: Multipart,
    limit: usize,
) -> Result<RequestPayload, ServiceError> {
    let mut upload = None;

    while let Some(item) = multipart.next().await {
        let mut field = item.map_err(|e| ServiceError::Multipart(e.to_string()))?;
        let wanted = upload.is_none()
            && field.content_disposition().get_name() == Some(IMAGE_FIELD);

        if !wanted {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| ServiceError::Multipart(e.to_string()))?;
            }
            continue;
        }

        let content_type = field
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ServiceError::Multipart(e.to_string()))?;
            if bytes.len() + chunk.len() > limit {
                return Err(ServiceError::PayloadTooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        upload = Some(RequestPayload::FileUpload {
            bytes,
            content_type,
        });
    }

    upload.ok_or(ServiceError::NoImage)
}

async fn read_body(mut body: web::Payload, limit: usize) -> Result<web::BytesMut, ServiceError> {
    let mut bytes = web::BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ServiceError::Payload(e.to_string()))?;
        if bytes.len() + chunk.len() > limit {
            return Err(ServiceError::PayloadTooLarge { limit });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn describe(payload: &RequestPayload) -> String {
    match payload {
        RequestPayload::FileUpload {
            bytes,
            content_type,
        } => format!(
            "file upload, {} bytes, {}",
            bytes.len(),
            content_type.as_deref().unwrap_or("no content type")
        ),
        RequestPayload::Base64Image(text) => format!("base64 text, {} chars", text.len()),
    }
}
