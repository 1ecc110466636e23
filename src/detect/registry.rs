use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::config::{ModelKind, ModelSpec, RecognizerConfig};

use super::backend::{Availability, BackendKind, RecognitionBackend};
use super::backends::{LumaLocalizer, UnavailableBackend};

/// Backend shared between the registry and recognition workers.
///
/// Wrapped in `Mutex` because `RecognitionBackend::infer` takes `&mut self`.
pub type SharedBackend = Arc<Mutex<dyn RecognitionBackend>>;

/// One configured model: its type name, backend and live call state.
#[derive(Clone)]
pub struct ModelSlot {
    model_type: String,
    availability: Availability,
    backend: SharedBackend,
    calls: Arc<CallState>,
}

/// Workers currently running on a slot, and whether one of them outlived a
/// join timeout.
#[derive(Default)]
struct CallState {
    in_flight: AtomicUsize,
    stalled: AtomicBool,
}

/// Marks one worker as running on a slot until dropped.
pub(crate) struct InFlight(Arc<CallState>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.stalled.store(false, Ordering::Release);
        }
    }
}

impl ModelSlot {
    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn backend(&self) -> SharedBackend {
        Arc::clone(&self.backend)
    }

    /// Current usability. Reads the backend's flag, never its lock, so the
    /// check does not wait on a backend busy with another call.
    pub fn is_usable(&self) -> bool {
        self.availability.is_usable()
    }

    /// True while a worker that outlived a join timeout is still running.
    pub fn is_stalled(&self) -> bool {
        self.calls.stalled.load(Ordering::Acquire)
            && self.calls.in_flight.load(Ordering::Acquire) > 0
    }

    pub(crate) fn begin_call(&self) -> InFlight {
        if self.calls.in_flight.fetch_add(1, Ordering::AcqRel) == 0 {
            // A flag raised after the last worker already finished is stale.
            self.calls.stalled.store(false, Ordering::Release);
        }
        InFlight(Arc::clone(&self.calls))
    }

    /// Flag the slot after its worker missed the join deadline. Cleared once
    /// no worker is running on it.
    pub(crate) fn mark_stalled(&self) {
        self.calls.stalled.store(true, Ordering::Release);
    }
}

/// Ordered set of model backends. Order is configuration order.
pub struct BackendRegistry {
    slots: Vec<ModelSlot>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Build every configured model. Models that fail to load are registered
    /// as unavailable so that their slot is skipped at recognition time.
    pub fn from_config(cfg: &RecognizerConfig) -> Result<Self> {
        let mut registry = Self::new();
        for model in &cfg.models {
            registry.register_model(cfg, model)?;
        }
        log::info!(
            "backend registry: {} models configured, {} usable",
            registry.len(),
            registry.usable_count()
        );
        Ok(registry)
    }

    fn register_model(&mut self, cfg: &RecognizerConfig, model: &ModelSpec) -> Result<()> {
        let outcome = match model.kind {
            ModelKind::LumaLocalizer => LumaLocalizer::new(model.name.clone())
                .with_grid(model.grid)
                .and_then(|b| b.with_threshold(model.threshold))
                .and_then(|b| self.register(b)),
            ModelKind::OnnxClassifier => self.register_onnx(cfg, model),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if self.get(&model.name).is_none() => {
                log::warn!("model '{}' unavailable: {:#}", model.name, err);
                self.register_unavailable(&model.name, backend_kind(model.kind), format!("{:#}", err))
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn register_onnx(&mut self, cfg: &RecognizerConfig, model: &ModelSpec) -> Result<()> {
        use super::backends::tract::{read_labels, OnnxClassifier};

        let path = model
            .path
            .as_deref()
            .map(|p| cfg.resolve(p))
            .ok_or_else(|| anyhow!("no model path configured"))?;
        if !path.exists() {
            return Err(anyhow!("model file {} not found", path.display()));
        }
        let labels = match model.labels.as_deref() {
            Some(labels) => read_labels(&cfg.resolve(labels))?,
            None => Vec::new(),
        };
        let backend = OnnxClassifier::new(model.name.clone(), path, labels, model.width, model.height)?
            .with_top_k(model.top_k);
        self.register(backend)
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_onnx(&mut self, _cfg: &RecognizerConfig, _model: &ModelSpec) -> Result<()> {
        Err(anyhow!("ONNX models require the backend-tract feature"))
    }

    /// Register a backend under its model type. Model types must be unique.
    pub fn register<B: RecognitionBackend + 'static>(&mut self, backend: B) -> Result<()> {
        let model_type = backend.model_type().to_string();
        let availability = backend.availability();
        self.push_slot(model_type, availability, Arc::new(Mutex::new(backend)))
    }

    /// Register an already shared backend.
    pub fn register_shared(&mut self, backend: SharedBackend) -> Result<()> {
        let (model_type, availability) = {
            let guard = backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            (guard.model_type().to_string(), guard.availability())
        };
        self.push_slot(model_type, availability, backend)
    }

    /// Register a placeholder for a model that failed to load.
    pub fn register_unavailable(
        &mut self,
        model_type: &str,
        kind: BackendKind,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.register(UnavailableBackend::new(model_type, kind, reason))
    }

    fn push_slot(
        &mut self,
        model_type: String,
        availability: Availability,
        backend: SharedBackend,
    ) -> Result<()> {
        if self.get(&model_type).is_some() {
            return Err(anyhow!("backend '{}' already registered", model_type));
        }
        self.slots.push(ModelSlot {
            model_type,
            availability,
            backend,
            calls: Arc::default(),
        });
        Ok(())
    }

    /// Get backend by model type.
    pub fn get(&self, model_type: &str) -> Option<SharedBackend> {
        self.slots
            .iter()
            .find(|slot| slot.model_type == model_type)
            .map(ModelSlot::backend)
    }

    /// Model types in configuration order.
    pub fn list(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.model_type.clone()).collect()
    }

    pub fn slots(&self) -> &[ModelSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn usable_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_usable()).count()
    }

    /// Run the warm-up hook of every usable backend.
    pub fn warm_up(&self) -> Result<()> {
        for slot in self.slots.iter().filter(|s| s.is_usable()) {
            let mut guard = slot
                .backend
                .lock()
                .map_err(|_| anyhow!("backend '{}' lock poisoned", slot.model_type))?;
            guard.warm_up()?;
        }
        Ok(())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn backend_kind(kind: ModelKind) -> BackendKind {
    match kind {
        ModelKind::OnnxClassifier => BackendKind::Classifier,
        ModelKind::LumaLocalizer => BackendKind::Localizer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::recognizer::ResultOrder;
    use std::path::PathBuf;

    fn model(name: &str, kind: ModelKind) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            kind,
            path: Some(PathBuf::from("does-not-exist.onnx")),
            labels: None,
            width: 224,
            height: 224,
            top_k: 5,
            threshold: 0.75,
            grid: 8,
        }
    }

    #[test]
    fn registry_keeps_configuration_order() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new("b")).unwrap();
        registry.register(StubBackend::new("a")).unwrap();
        registry.register(StubBackend::new("c").unusable()).unwrap();

        assert_eq!(registry.list(), vec!["b", "a", "c"]);
        assert_eq!(registry.usable_count(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("zzz").is_none());
    }

    #[test]
    fn usability_is_read_live() {
        let backend = StubBackend::new("a");
        let availability = backend.availability();
        let mut registry = BackendRegistry::new();
        registry.register(backend).unwrap();
        assert_eq!(registry.usable_count(), 1);

        availability.set_usable(false);
        assert_eq!(registry.usable_count(), 0);
        assert!(!registry.slots()[0].is_usable());

        availability.set_usable(true);
        assert!(registry.slots()[0].is_usable());
    }

    #[test]
    fn stalled_flag_needs_a_running_worker() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new("a")).unwrap();
        let slot = registry.slots()[0].clone();

        let call = slot.begin_call();
        slot.mark_stalled();
        assert!(slot.is_stalled());
        drop(call);
        assert!(!slot.is_stalled());

        // A new call on an idle slot starts clean.
        slot.mark_stalled();
        let _call = slot.begin_call();
        assert!(!slot.is_stalled());
    }

    #[test]
    fn duplicate_model_types_are_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new("a")).unwrap();
        assert!(registry.register(StubBackend::new("a")).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_models_become_unusable_slots() {
        let cfg = RecognizerConfig {
            models_dir: PathBuf::from("/nonexistent"),
            result_order: ResultOrder::Completion,
            join_timeout: None,
            models: vec![
                model("classifier", ModelKind::OnnxClassifier),
                model("bright", ModelKind::LumaLocalizer),
            ],
        };
        let registry = BackendRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.list(), vec!["classifier", "bright"]);
        assert_eq!(registry.usable_count(), 1);
        assert!(!registry.slots()[0].is_usable());
        assert!(registry.slots()[1].is_usable());
    }

    #[test]
    fn invalid_localizer_settings_become_unusable_slot() {
        let mut bad = model("bright", ModelKind::LumaLocalizer);
        bad.grid = 0;
        let cfg = RecognizerConfig {
            models_dir: PathBuf::from("models"),
            result_order: ResultOrder::Completion,
            join_timeout: None,
            models: vec![bad],
        };
        let registry = BackendRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.usable_count(), 0);
    }
}
