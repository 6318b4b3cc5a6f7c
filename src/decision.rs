use crate::classifier::ProbabilityVector;
use crate::error::ServiceError;
use crate::models::PredictionResult;

/// Allowed distance between the probability mass and 1.0.
pub const MASS_TOLERANCE: f32 = 1e-3;

/// Picks the most probable class.
///
/// Ties go to the lowest index. The confidence is reported exactly as the model
/// produced it; acting on low confidence is left to the caller. A vector whose
/// length disagrees with `labels` means the model and label table are out of
/// sync. Values outside `[0, 1]` or a total mass away from 1.0 mean the model
/// is not emitting a softmax distribution (e.g. exported without its final
/// activation); both are rejected rather than served as confidences.
pub fn decide(
    probabilities: &ProbabilityVector,
    labels: &[&'static str],
) -> Result<PredictionResult, ServiceError> {
    let values = probabilities.as_slice();
    if values.len() != labels.len() {
        return Err(ServiceError::InternalInconsistency(format!(
            "model produced {} probabilities for {} labels",
            values.len(),
            labels.len()
        )));
    }
    if let Some(index) = values.iter().position(|p| !p.is_finite()) {
        return Err(ServiceError::InternalInconsistency(format!(
            "non-finite probability at index {index}"
        )));
    }
    if let Some(index) = values.iter().position(|p| !(0.0..=1.0).contains(p)) {
        return Err(ServiceError::InternalInconsistency(format!(
            "probability {} at index {index} outside [0, 1]",
            values[index]
        )));
    }
    let mass = probabilities.sum();
    if (mass - 1.0).abs() > MASS_TOLERANCE {
        return Err(ServiceError::InternalInconsistency(format!(
            "probabilities sum to {mass}, expected 1.0"
        )));
    }

    let (class_index, confidence) = values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, top)) if p <= top => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| ServiceError::InternalInconsistency("empty probability vector".into()))?;

    let class_label = labels.get(class_index).copied().ok_or_else(|| {
        ServiceError::InternalInconsistency(format!("class index {class_index} has no label"))
    })?;

    Ok(PredictionResult {
        class_label,
        confidence,
        class_index,
    })
}
