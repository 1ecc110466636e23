use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::frame::RgbFrame;

use super::observation::RawObservation;

/// Observation shape a backend produces.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Whole-image labels, no boxes.
    Classifier,
    /// Boxed objects, optionally labeled.
    Localizer,
}

/// Shared usability flag of one backend.
///
/// The backend keeps one clone and flips it when its model is loaded or
/// unloaded; the registry keeps another and reads it before every dispatch,
/// without touching the backend's lock.
#[derive(Clone, Debug)]
pub struct Availability(Arc<AtomicBool>);

impl Availability {
    pub fn new(usable: bool) -> Self {
        Self(Arc::new(AtomicBool::new(usable)))
    }

    pub fn is_usable(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_usable(&self, usable: bool) {
        self.0.store(usable, Ordering::Release);
    }
}

impl Default for Availability {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Inference backend wrapping one loaded model.
///
/// Backends are invoked from worker threads, one call at a time per backend
/// (the registry wraps each in a `Mutex`). A call must not retain the frame.
pub trait RecognitionBackend: Send {
    /// Model identifier reported in every `RecognitionResult` of this backend.
    fn model_type(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Usability handle, taken once at registration and queried on every call.
    /// Unusable backends are skipped without producing a result.
    ///
    /// The default is a backend that is always usable.
    fn availability(&self) -> Availability {
        Availability::default()
    }

    /// Run inference on a frame.
    fn infer(&mut self, frame: &RgbFrame) -> Result<Vec<RawObservation>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
