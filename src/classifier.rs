use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::info;
use tract_onnx::prelude::*;

use crate::error::ModelError;
use crate::labels::NUM_CLASSES;
use crate::preprocess::{ImageTensor, INPUT_SHAPE};

/// Softmax output of the classifier, one entry per class in label order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }
}

impl From<Vec<f32>> for ProbabilityVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A frozen model: tensor in, probability vector out.
///
/// Implementations are shared across workers without locking, so `infer`
/// must be a pure function of its input.
pub trait Classifier: Send + Sync {
    fn infer(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ModelError>;
}

/// The process-wide model slot, empty when loading failed at startup.
#[derive(Clone, Default)]
pub struct ModelHandle(Option<Arc<dyn Classifier>>);

impl ModelHandle {
    pub fn loaded<C: Classifier + 'static>(classifier: C) -> Self {
        Self(Some(Arc::new(classifier)))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }

    pub fn is_loaded(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Classifier for ModelHandle {
    fn infer(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ModelError> {
        match &self.0 {
            Some(classifier) => classifier.infer(tensor),
            None => Err(ModelError::Unavailable),
        }
    }
}

type OnnxPlan = TypedRunnableModel<TypedModel>;

/// ONNX graph taking NHWC `f32[1, 128, 128, 3]` and producing `f32[1, 38]`.
///
/// `SimplePlan::run` borrows the plan immutably and builds a fresh execution
/// state per call, so one instance serves concurrent requests.
pub struct OnnxClassifier {
    plan: OnnxPlan,
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<OnnxClassifier>();
        assert_send_sync::<ModelHandle>();
    }
};

impl OnnxClassifier {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let load_err = |e: TractError| ModelError::Load {
            path: path.display().to_string(),
            message: format!("{e:#}"),
        };

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_err)?
            .with_input_fact(0, f32::fact(INPUT_SHAPE).into())
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?;

        let declared = model
            .output_fact(0)
            .map_err(load_err)?
            .shape
            .as_concrete()
            .and_then(|shape| shape.last().copied());
        if let Some(actual) = declared {
            if actual != NUM_CLASSES {
                return Err(ModelError::OutputMismatch {
                    expected: NUM_CLASSES,
                    actual,
                });
            }
        }

        let plan = model.into_runnable().map_err(load_err)?;
        info!("loaded ONNX model from {}", path.display());
        Ok(Self { plan })
    }
}

impl Classifier for OnnxClassifier {
    fn infer(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ModelError> {
        let inference_err = |e: TractError| ModelError::Inference(format!("{e:#}"));

        let input = Tensor::from_shape::<f32>(&INPUT_SHAPE, &tensor.to_vec()).map_err(inference_err)?;
        let outputs = self.plan.run(tvec!(input.into())).map_err(inference_err)?;
        let output = outputs
            .first()
            .ok_or_else(|| ModelError::Inference("model produced no outputs".to_string()))?;
        let values = output
            .to_array_view::<f32>()
            .map_err(inference_err)?
            .iter()
            .copied()
            .collect::<Vec<_>>();

        Ok(ProbabilityVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::decide;
    use crate::labels::CLASS_LABELS;
    use ndarray::Array4;
    use prost::Message;
    use std::io::Write;
    use tract_onnx::pb;

    const ONNX_FLOAT: i32 = 1;
    const ONNX_INT64: i32 = 7;

    struct Uniform;

    impl Classifier for Uniform {
        fn infer(&self, _tensor: &ImageTensor) -> Result<ProbabilityVector, ModelError> {
            Ok(vec![1.0 / NUM_CLASSES as f32; NUM_CLASSES].into())
        }
    }

    fn blank_tensor() -> ImageTensor {
        ImageTensor::from_array(Array4::zeros(INPUT_SHAPE)).unwrap()
    }

    #[test]
    fn empty_handle_reports_unavailable() {
        let handle = ModelHandle::unavailable();
        assert!(!handle.is_loaded());
        assert!(matches!(
            handle.infer(&blank_tensor()),
            Err(ModelError::Unavailable)
        ));
    }

    #[test]
    fn loaded_handle_delegates() {
        let handle = ModelHandle::loaded(Uniform);
        assert!(handle.is_loaded());
        let probs = handle.infer(&blank_tensor()).unwrap();
        assert_eq!(probs.len(), NUM_CLASSES);
        assert!((probs.sum() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn missing_model_file_fails_to_load() {
        let err = OnnxClassifier::load("does/not/exist.onnx").err().unwrap();
        match err {
            ModelError::Load { path, .. } => assert!(path.ends_with("exist.onnx")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn garbage_model_file_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a protobuf graph").unwrap();
        let err = OnnxClassifier::load(file.path()).err().unwrap();
        assert!(matches!(err, ModelError::Load { .. }));
    }

    fn value_info(name: &str, dims: &[i64]) -> pb::ValueInfoProto {
        let dim = dims
            .iter()
            .map(|&d| pb::tensor_shape_proto::Dimension {
                value: Some(pb::tensor_shape_proto::dimension::Value::DimValue(d)),
                ..Default::default()
            })
            .collect();
        pb::ValueInfoProto {
            name: name.to_string(),
            r#type: Some(pb::TypeProto {
                value: Some(pb::type_proto::Value::TensorType(pb::type_proto::Tensor {
                    elem_type: ONNX_FLOAT,
                    shape: Some(pb::TensorShapeProto {
                        dim,
                        ..Default::default()
                    }),
                    ..Default::default()
                })),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn scalar_i64(name: &str, value: i64) -> pb::TensorProto {
        pb::TensorProto {
            name: name.to_string(),
            dims: vec![1],
            data_type: ONNX_INT64,
            int64_data: vec![value],
            ..Default::default()
        }
    }

    fn node(op_type: &str, inputs: &[&str], output: &str) -> pb::NodeProto {
        pb::NodeProto {
            name: output.to_string(),
            op_type: op_type.to_string(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.to_string()],
            ..Default::default()
        }
    }

    /// NHWC image -> Flatten -> first `width` elements -> Softmax.
    fn write_slice_softmax_model(width: i64) -> tempfile::NamedTempFile {
        let graph = pb::GraphProto {
            name: "leaf_stub".to_string(),
            node: vec![
                node("Flatten", &["input"], "flat"),
                node("Slice", &["flat", "starts", "ends", "axes"], "logits"),
                node("Softmax", &["logits"], "probs"),
            ],
            initializer: vec![
                scalar_i64("starts", 0),
                scalar_i64("ends", width),
                scalar_i64("axes", 1),
            ],
            input: vec![value_info("input", &[1, 128, 128, 3])],
            output: vec![value_info("probs", &[1, width])],
            ..Default::default()
        };
        let model = pb::ModelProto {
            ir_version: 7,
            opset_import: vec![pb::OperatorSetIdProto {
                domain: String::new(),
                version: 13,
                ..Default::default()
            }],
            graph: Some(graph),
            ..Default::default()
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&model.encode_to_vec()).unwrap();
        file
    }

    #[test]
    fn onnx_model_yields_one_probability_per_class() {
        let file = write_slice_softmax_model(NUM_CLASSES as i64);
        let classifier = OnnxClassifier::load(file.path()).unwrap();

        let probs = classifier.infer(&blank_tensor()).unwrap();
        assert_eq!(probs.len(), NUM_CLASSES);
        assert!((probs.sum() - 1.0).abs() < 1e-4);
        for p in probs.as_slice() {
            assert!((p - 1.0 / NUM_CLASSES as f32).abs() < 1e-5);
        }
    }

    #[test]
    fn onnx_input_is_fed_in_nhwc_order() {
        let file = write_slice_softmax_model(NUM_CLASSES as i64);
        let classifier = OnnxClassifier::load(file.path()).unwrap();

        // (y=0, x=12, c=1) sits at flat offset 12 * 3 + 1 = 37 in NHWC layout.
        let mut array = Array4::<f32>::zeros(INPUT_SHAPE);
        array[[0, 0, 12, 1]] = 1.0;
        let tensor = ImageTensor::from_array(array).unwrap();

        let probs = classifier.infer(&tensor).unwrap();
        let result = decide(&probs, &CLASS_LABELS).unwrap();
        assert_eq!(result.class_index, 37);
        assert_eq!(result.class_label, CLASS_LABELS[37]);
        let expected = std::f32::consts::E / (std::f32::consts::E + (NUM_CLASSES - 1) as f32);
        assert!((result.confidence - expected).abs() < 1e-5);
    }

    #[test]
    fn onnx_inference_is_deterministic_across_loads() {
        let file = write_slice_softmax_model(NUM_CLASSES as i64);
        let mut array = Array4::<f32>::zeros(INPUT_SHAPE);
        array[[0, 0, 3, 0]] = 0.5;
        let tensor = ImageTensor::from_array(array).unwrap();

        let first = OnnxClassifier::load(file.path()).unwrap().infer(&tensor).unwrap();
        let second = OnnxClassifier::load(file.path()).unwrap().infer(&tensor).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn onnx_model_with_wrong_width_is_rejected_at_load() {
        let file = write_slice_softmax_model(10);
        let err = OnnxClassifier::load(file.path()).err().unwrap();
        match err {
            ModelError::OutputMismatch { expected, actual } => {
                assert_eq!(expected, NUM_CLASSES);
                assert_eq!(actual, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
