use anyhow::{anyhow, Result};

use crate::detect::backend::{Availability, BackendKind, RecognitionBackend};
use crate::detect::observation::RawObservation;
use crate::frame::RgbFrame;

/// Placeholder for a configured model that could not be loaded.
///
/// Always reports itself unusable, so the recognizer skips its slot.
pub struct UnavailableBackend {
    model_type: String,
    kind: BackendKind,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(model_type: impl Into<String>, kind: BackendKind, reason: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl RecognitionBackend for UnavailableBackend {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn availability(&self) -> Availability {
        Availability::new(false)
    }

    fn infer(&mut self, _frame: &RgbFrame) -> Result<Vec<RawObservation>> {
        Err(anyhow!(
            "model '{}' is unavailable: {}",
            self.model_type,
            self.reason
        ))
    }
}
