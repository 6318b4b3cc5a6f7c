use std::time::Instant;

use log::debug;

use crate::classifier::{Classifier, ModelHandle};
use crate::decision::decide;
use crate::decoder::{self, DecodeLimits};
use crate::error::ServiceError;
use crate::labels::CLASS_LABELS;
use crate::models::{PredictionResult, RequestPayload};
use crate::preprocess::Preprocessor;

/// decode -> preprocess -> infer -> decide, synchronously, one attempt per request.
#[derive(Debug, Clone)]
pub struct Pipeline {
    model: ModelHandle,
    preprocessor: Preprocessor,
    decode_limits: DecodeLimits,
    labels: &'static [&'static str],
}

impl Pipeline {
    pub fn new(model: ModelHandle, preprocessor: Preprocessor) -> Self {
        Self {
            model,
            preprocessor,
            decode_limits: DecodeLimits::default(),
            labels: &CLASS_LABELS,
        }
    }

    pub fn with_decode_limits(mut self, limits: DecodeLimits) -> Self {
        self.decode_limits = limits;
        self
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    pub fn labels(&self) -> &'static [&'static str] {
        self.labels
    }

    pub fn run(&self, payload: RequestPayload) -> Result<PredictionResult, ServiceError> {
        if !self.model_loaded() {
            return Err(ServiceError::ModelUnavailable);
        }

        let started = Instant::now();
        let raw = decoder::decode(payload, &self.decode_limits)?;
        let (width, height) = raw.dimensions();
        debug!(
            "decoded {:?} image {}x{} in {:.2?}",
            raw.format,
            width,
            height,
            started.elapsed()
        );

        let tensor = self.preprocessor.normalize(&raw);
        let probabilities = self.model.infer(&tensor)?;
        debug!(
            "inference finished in {:.2?} (probability mass {:.4})",
            started.elapsed(),
            probabilities.sum()
        );

        decide(&probabilities, self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ProbabilityVector;
    use crate::error::{DecodeError, ModelError};
    use crate::labels::NUM_CLASSES;
    use crate::preprocess::ImageTensor;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Puts all mass on a class derived from the mean red intensity.
    struct RedDetector;

    impl Classifier for RedDetector {
        fn infer(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ModelError> {
            let view = tensor.view();
            let red: f32 = view.iter().step_by(3).sum::<f32>() / (128.0 * 128.0);
            let index = ((red * (NUM_CLASSES - 1) as f32).round() as usize).min(NUM_CLASSES - 1);
            let mut values = vec![0.0f32; NUM_CLASSES];
            values[index] = 1.0;
            Ok(values.into())
        }
    }

    struct WrongWidth;

    impl Classifier for WrongWidth {
        fn infer(&self, _tensor: &ImageTensor) -> Result<ProbabilityVector, ModelError> {
            Ok(vec![0.25f32; 4].into())
        }
    }

    fn png(red: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(50, 70, Rgb([red, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn upload(bytes: Vec<u8>) -> RequestPayload {
        RequestPayload::FileUpload {
            bytes,
            content_type: Some("image/png".into()),
        }
    }

    #[test]
    fn runs_every_stage() {
        let pipeline = Pipeline::new(ModelHandle::loaded(RedDetector), Preprocessor::default());
        let result = pipeline.run(upload(png(255))).unwrap();
        assert_eq!(result.class_index, NUM_CLASSES - 1);
        assert_eq!(result.class_label, CLASS_LABELS[NUM_CLASSES - 1]);
        assert_eq!(result.confidence, 1.0);

        let result = pipeline.run(upload(png(0))).unwrap();
        assert_eq!(result.class_index, 0);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let pipeline = Pipeline::new(ModelHandle::loaded(RedDetector), Preprocessor::default());
        let first = pipeline.run(upload(png(120))).unwrap();
        let second = pipeline.run(upload(png(120))).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unloaded_model_short_circuits() {
        let pipeline = Pipeline::new(ModelHandle::unavailable(), Preprocessor::default());
        assert!(!pipeline.model_loaded());
        let err = pipeline.run(upload(png(1))).unwrap_err();
        assert!(matches!(err, ServiceError::ModelUnavailable));
    }

    #[test]
    fn decode_failures_surface_as_client_errors() {
        let pipeline = Pipeline::new(ModelHandle::loaded(RedDetector), Preprocessor::default());
        let err = pipeline.run(upload(Vec::new())).unwrap_err();
        assert!(matches!(err, ServiceError::Decode(DecodeError::Empty)));
    }

    #[test]
    fn mismatched_model_is_internal() {
        let pipeline = Pipeline::new(ModelHandle::loaded(WrongWidth), Preprocessor::default());
        let err = pipeline.run(upload(png(1))).unwrap_err();
        assert!(matches!(err, ServiceError::InternalInconsistency(_)));
    }

    #[test]
    fn decode_limits_are_enforced() {
        let limits = DecodeLimits {
            max_dimension: 32,
            ..DecodeLimits::default()
        };
        let pipeline = Pipeline::new(ModelHandle::loaded(RedDetector), Preprocessor::default())
            .with_decode_limits(limits);
        let err = pipeline.run(upload(png(1))).unwrap_err();
        assert!(matches!(err, ServiceError::Decode(DecodeError::TooLarge(_))));
    }
}
