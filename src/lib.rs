//! HTTP service that classifies plant-leaf photos into one of 38
//! species/disease classes with a frozen ONNX model.
//!
//! A request flows through [`decoder`] -> [`preprocess`] -> [`classifier`]
//! -> [`decision`], orchestrated by [`pipeline::Pipeline`] and exposed over
//! HTTP by [`handlers`].

pub mod classifier;
pub mod config;
pub mod decision;
pub mod decoder;
pub mod error;
pub mod handlers;
pub mod labels;
pub mod models;
pub mod pipeline;
pub mod preprocess;

pub use classifier::{Classifier, ModelHandle, OnnxClassifier, ProbabilityVector};
pub use config::Config;
pub use error::{DecodeError, ModelError, ServiceError};
pub use handlers::AppState;
pub use labels::{CLASS_LABELS, NUM_CLASSES};
pub use models::{PredictionResult, RequestPayload};
pub use pipeline::Pipeline;
pub use preprocess::{ImageTensor, Preprocessor};
