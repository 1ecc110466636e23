use super::result::{BoundingBox, DetectionId};

/// One candidate label attached to a localized object, best first.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassLabel {
    pub identifier: String,
    pub confidence: f32,
}

impl ClassLabel {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }
}

/// Raw backend output for one object instance, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub enum RawObservation {
    /// Whole-image class prediction.
    Classification {
        id: DetectionId,
        identifier: String,
        confidence: f32,
    },
    /// Localized object. `labels` may be empty when the model only localizes.
    Localization {
        id: DetectionId,
        bbox: BoundingBox,
        labels: Vec<ClassLabel>,
    },
}

impl RawObservation {
    pub fn classification(identifier: impl Into<String>, confidence: f32) -> Self {
        RawObservation::Classification {
            id: DetectionId::new(),
            identifier: identifier.into(),
            confidence,
        }
    }

    pub fn localization(bbox: BoundingBox, labels: Vec<ClassLabel>) -> Self {
        RawObservation::Localization {
            id: DetectionId::new(),
            bbox,
            labels,
        }
    }

    pub fn id(&self) -> DetectionId {
        match self {
            RawObservation::Classification { id, .. } | RawObservation::Localization { id, .. } => {
                *id
            }
        }
    }
}
