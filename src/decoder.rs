use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::io::{Limits, Reader as ImageReader};
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat};
use log::debug;

use crate::error::DecodeError;
use crate::models::RequestPayload;

/// A decoded image in whatever colour layout its container used.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl RawImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 8192;
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 256 * 1024 * 1024;

/// Caps on what a single upload may expand to once decoded. A few hundred
/// kilobytes of compressed PNG can describe a 12000x12000 canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Largest accepted width or height, in pixels.
    pub max_dimension: u32,
    /// Largest buffer the decoder may allocate.
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            max_alloc: DEFAULT_MAX_DECODE_BYTES,
        }
    }
}

impl DecodeLimits {
    fn to_image_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Decodes either payload variant. Base64 text is unwrapped to bytes first, so
/// both variants share the same byte-level decoding path.
pub fn decode(payload: RequestPayload, limits: &DecodeLimits) -> Result<RawImage, DecodeError> {
    match payload {
        RequestPayload::FileUpload {
            bytes,
            content_type,
        } => {
            debug!(
                "decoding upload of {} bytes (declared type {:?})",
                bytes.len(),
                content_type
            );
            decode_bytes(&bytes, limits)
        }
        RequestPayload::Base64Image(text) => {
            let bytes = decode_base64(&text)?;
            debug!("decoding base64 image of {} bytes", bytes.len());
            decode_bytes(&bytes, limits)
        }
    }
}

/// Strips an optional `data:image/...;base64,` prefix and ignores ASCII whitespace.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    let encoded = if text.starts_with("data:image") {
        match text.split_once(',') {
            Some((_, rest)) => rest,
            None => {
                return Err(DecodeError::InvalidBase64(
                    "data URL without a payload".to_string(),
                ))
            }
        }
    } else {
        text
    };

    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    STANDARD
        .decode(compact)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

/// Reads the header first so oversized canvases are refused before any pixel
/// buffer is allocated.
pub fn decode_bytes(bytes: &[u8], limits: &DecodeLimits) -> Result<RawImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (width, height) = guessed_reader(bytes)?
        .into_dimensions()
        .map_err(decode_error)?;
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(DecodeError::TooLarge(format!(
            "{width}x{height} exceeds {max}x{max}",
            max = limits.max_dimension
        )));
    }

    let mut reader = guessed_reader(bytes)?;
    let format = reader.format().ok_or(DecodeError::UnsupportedFormat)?;
    reader.limits(limits.to_image_limits());
    let image = reader.decode().map_err(decode_error)?;

    Ok(RawImage { image, format })
}

fn guessed_reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
    if reader.format().is_none() {
        return Err(DecodeError::UnsupportedFormat);
    }
    Ok(reader)
}

fn decode_error(err: ImageError) -> DecodeError {
    match err {
        ImageError::Limits(e) => DecodeError::TooLarge(e.to_string()),
        ImageError::Unsupported(_) => DecodeError::UnsupportedFormat,
        other => DecodeError::Corrupt(other.to_string()),
    }
}
