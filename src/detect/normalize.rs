use super::observation::RawObservation;
use super::result::{Detection, RecognitionResult};

/// Label used for localized objects whose backend reported no class.
pub const DEFAULT_OBJECT_LABEL: &str = "Object";

/// Convert raw backend output into a sorted success result for `model_type`.
///
/// Malformed observations are repaired, never rejected: a localization without
/// labels becomes `DEFAULT_OBJECT_LABEL` at confidence 0, and NaN confidences become 0.
pub fn normalize(observations: Vec<RawObservation>, model_type: &str) -> RecognitionResult {
    let mut predictions: Vec<Detection> = observations.into_iter().map(to_detection).collect();
    // Vec::sort_by is stable: equal confidences keep backend order.
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    RecognitionResult {
        predictions: Some(predictions),
        model_type: model_type.to_string(),
    }
}

fn to_detection(observation: RawObservation) -> Detection {
    match observation {
        RawObservation::Classification {
            id,
            identifier,
            confidence,
        } => Detection {
            label: identifier,
            confidence: sanitize_confidence(confidence),
            id,
            bbox: None,
        },
        RawObservation::Localization { id, bbox, labels } => {
            let (label, confidence) = labels
                .into_iter()
                .next()
                .map(|top| (top.identifier, top.confidence))
                .unwrap_or_else(|| (DEFAULT_OBJECT_LABEL.to_string(), 0.0));
            Detection {
                label,
                confidence: sanitize_confidence(confidence),
                id,
                bbox: Some(bbox),
            }
        }
    }
}

fn sanitize_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
