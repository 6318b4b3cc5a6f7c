use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use image::imageops::FilterType;

use crate::decoder::{DecodeLimits, DEFAULT_MAX_DECODE_BYTES, DEFAULT_MAX_IMAGE_DIMENSION};

pub const DEFAULT_MODEL_PATH: &str = "plant_detection_model.onnx";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Plant leaf disease classification service.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to serve on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Location of the frozen ONNX model
    #[arg(short, long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Largest accepted request body or uploaded file, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Largest accepted image width or height after decoding, in pixels
    #[arg(long, env = "MAX_IMAGE_DIMENSION", default_value_t = DEFAULT_MAX_IMAGE_DIMENSION)]
    pub max_image_dimension: u32,

    /// Largest buffer the image decoder may allocate, in bytes
    #[arg(long, env = "MAX_DECODE_BYTES", default_value_t = DEFAULT_MAX_DECODE_BYTES)]
    pub max_decode_bytes: u64,

    /// Resampling filter; must match the one used to prepare training data.
    /// The default reproduces Pillow's bicubic `Image.resize`; use `triangle`
    /// for models trained on bilinear-resized inputs (Keras loaders)
    #[arg(long, env = "RESIZE_FILTER", value_enum, default_value_t = ResizeFilter::CatmullRom)]
    pub resize_filter: ResizeFilter,

    /// Number of HTTP workers (defaults to one per core)
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,

    /// Exit instead of serving in degraded mode when the model fails to load
    #[arg(long, env = "REQUIRE_MODEL")]
    pub require_model: bool,
}

impl Config {
    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_dimension: self.max_image_dimension,
            max_alloc: self.max_decode_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResizeFilter {
    Nearest,
    /// Bilinear
    Triangle,
    /// Bicubic (a = -0.5), as in Pillow
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}
