use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::{Availability, BackendKind, RecognitionBackend};
use crate::detect::observation::RawObservation;
use crate::detect::result::DetectionId;
use crate::frame::RgbFrame;

#[derive(Clone, Debug)]
enum StubBehavior {
    Observe(Vec<RawObservation>),
    Fail(String),
    Panic,
}

/// Scripted backend for tests and demos.
///
/// Returns the same observations on every call (with fresh detection ids),
/// or fails, or panics, as configured. Counts `infer` calls. A gated stub
/// blocks each call until the gate releases it (or its sender is dropped).
pub struct StubBackend {
    model_type: String,
    kind: BackendKind,
    behavior: StubBehavior,
    availability: Availability,
    delay: Option<Duration>,
    gate: Option<Receiver<()>>,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            kind: BackendKind::Classifier,
            behavior: StubBehavior::Observe(Vec::new()),
            availability: Availability::default(),
            delay: None,
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_observations(mut self, observations: Vec<RawObservation>) -> Self {
        if observations
            .iter()
            .any(|o| matches!(o, RawObservation::Localization { .. }))
        {
            self.kind = BackendKind::Localizer;
        }
        self.behavior = StubBehavior::Observe(observations);
        self
    }

    /// Every `infer` call returns an error with this message.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.behavior = StubBehavior::Fail(message.into());
        self
    }

    /// Every `infer` call panics.
    pub fn panicking(mut self) -> Self {
        self.behavior = StubBehavior::Panic;
        self
    }

    /// Report the backend as unusable (model missing).
    pub fn unusable(self) -> Self {
        self.availability.set_usable(false);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block every `infer` call until one message arrives on `gate`.
    pub fn gated(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Shared counter of `infer` invocations.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl RecognitionBackend for StubBackend {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn availability(&self) -> Availability {
        self.availability.clone()
    }

    fn infer(&mut self, _frame: &RgbFrame) -> Result<Vec<RawObservation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            // A dropped sender opens the gate for good.
            let _ = gate.recv();
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match &self.behavior {
            StubBehavior::Observe(observations) => {
                Ok(observations.iter().cloned().map(with_fresh_id).collect())
            }
            StubBehavior::Fail(message) => Err(anyhow!("{}", message)),
            StubBehavior::Panic => panic!("stub backend '{}' panicked", self.model_type),
        }
    }
}

fn with_fresh_id(observation: RawObservation) -> RawObservation {
    match observation {
        RawObservation::Classification {
            identifier,
            confidence,
            ..
        } => RawObservation::Classification {
            id: DetectionId::new(),
            identifier,
            confidence,
        },
        RawObservation::Localization { bbox, labels, .. } => RawObservation::Localization {
            id: DetectionId::new(),
            bbox,
            labels,
        },
    }
}
