//! Multi-model recognition orchestrator.
//!
//! One call fans a converted frame out to every usable backend, one worker
//! thread per backend, and joins their contributions into one collection:
//!
//! 1. Convert the image once. Failure completes the call with `None` and no
//!    backend is touched.
//! 2. Skip backends that are unusable at call time. They contribute no result
//!    at all. A backend still running a call that outlived the join timeout
//!    is not dispatched again; it reports a failure result instead.
//! 3. Run the remaining backends concurrently. Each worker sends exactly one
//!    `(slot index, RecognitionResult)` over a channel: the normalized
//!    predictions, or `predictions: None` when inference failed or panicked.
//! 4. The coordinator is the only consumer of that channel and the only writer
//!    of the result collection. It waits until every dispatched backend has
//!    reported (or the optional join timeout expires), then completes once.
//!
//! Results arrive in completion order unless `ResultOrder::Configured` is set.

use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::config::RecognizerConfig;
use crate::detect::{
    normalize, BackendRegistry, ModelSlot, RawObservation, RecognitionResult, SharedBackend,
};
use crate::dispatch::CompletionQueue;
use crate::frame::{ImageInput, RgbFrame};

const COMPLETION_THREAD_NAME: &str = "recognizer-completion";

/// Order of results in a joined collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResultOrder {
    /// Order in which backends finished.
    #[default]
    Completion,
    /// Backend registration order.
    Configured,
}

impl FromStr for ResultOrder {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "completion" => Ok(ResultOrder::Completion),
            "configured" | "config" => Ok(ResultOrder::Configured),
            other => Err(anyhow!(
                "unknown result order '{}' (expected completion or configured)",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecognizerSettings {
    pub result_order: ResultOrder,
    /// Upper bound on the join barrier. `None` waits for every backend.
    pub join_timeout: Option<Duration>,
}

pub struct Recognizer {
    slots: Arc<[ModelSlot]>,
    settings: RecognizerSettings,
    completion: CompletionQueue,
}

impl Recognizer {
    pub fn new(registry: BackendRegistry) -> Result<Self> {
        Self::with_settings(registry, RecognizerSettings::default())
    }

    pub fn with_settings(registry: BackendRegistry, settings: RecognizerSettings) -> Result<Self> {
        log::info!(
            "initializing recognizer: {} models ({} usable), order={:?}, join_timeout={:?}",
            registry.len(),
            registry.usable_count(),
            settings.result_order,
            settings.join_timeout
        );
        let completion = CompletionQueue::spawn(COMPLETION_THREAD_NAME)?;
        Ok(Self {
            slots: registry.slots().to_vec().into(),
            settings,
            completion,
        })
    }

    /// Build the registry and settings from configuration.
    pub fn from_config(cfg: &RecognizerConfig) -> Result<Self> {
        let registry = BackendRegistry::from_config(cfg)?;
        Self::with_settings(registry, cfg.settings())
    }

    pub fn settings(&self) -> RecognizerSettings {
        self.settings
    }

    /// Model types in registration order, usable or not.
    pub fn model_types(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.model_type().to_string())
            .collect()
    }

    /// Thread on which completions are delivered.
    pub fn completion_thread(&self) -> ThreadId {
        self.completion.thread_id()
    }

    /// Recognize asynchronously. `completion` runs exactly once on the completion
    /// thread: with `None` when the image cannot be converted, otherwise with one
    /// result per usable backend.
    ///
    /// An `Err` means the call could not be started and `completion` will not run.
    pub fn recognize<I, F>(&self, image: &I, completion: F) -> Result<()>
    where
        I: ImageInput + ?Sized,
        F: FnOnce(Option<Vec<RecognitionResult>>) + Send + 'static,
    {
        let Some(frame) = convert(image) else {
            return self.completion.post(move || completion(None));
        };
        let slots = Arc::clone(&self.slots);
        let settings = self.settings;
        let handle = self.completion.handle();
        thread::Builder::new()
            .name("recognizer-coordinator".to_string())
            .spawn(move || {
                let results = run_batch(&slots, Arc::new(frame), settings);
                if let Err(err) = handle.post(move || completion(Some(results))) {
                    log::error!("recognition results dropped: {}", err);
                }
            })
            .context("failed to spawn recognition coordinator")?;
        Ok(())
    }

    /// Recognize on the calling thread, which acts as the coordinator.
    pub fn recognize_blocking<I>(&self, image: &I) -> Option<Vec<RecognitionResult>>
    where
        I: ImageInput + ?Sized,
    {
        let frame = convert(image)?;
        Some(run_batch(&self.slots, Arc::new(frame), self.settings))
    }
}

fn convert<I: ImageInput + ?Sized>(image: &I) -> Option<RgbFrame> {
    let frame = image.to_rgb_frame();
    if frame.is_none() {
        log::warn!("image conversion failed; recognition aborted before any backend ran");
    }
    frame
}

/// Dispatch one frame to every usable slot and join the results.
fn run_batch(
    slots: &[ModelSlot],
    frame: Arc<RgbFrame>,
    settings: RecognizerSettings,
) -> Vec<RecognitionResult> {
    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<(usize, RecognitionResult)>();
    let mut collected: Vec<(usize, RecognitionResult)> = Vec::with_capacity(slots.len());
    let mut pending: Vec<usize> = Vec::with_capacity(slots.len());

    for (index, slot) in slots.iter().enumerate() {
        if !slot.is_usable() {
            log::debug!("skipping unusable backend '{}'", slot.model_type());
            continue;
        }
        if slot.is_stalled() {
            log::warn!(
                "backend '{}' is still busy with a timed-out call; not dispatched",
                slot.model_type()
            );
            collected.push((index, RecognitionResult::failed(slot.model_type())));
            continue;
        }
        let tx = tx.clone();
        let backend = slot.backend();
        let model_type = slot.model_type().to_string();
        let frame = Arc::clone(&frame);
        let in_flight = slot.begin_call();
        let spawned = thread::Builder::new()
            .name(format!("recognize-{}", model_type))
            .spawn(move || {
                let result = run_backend(&backend, &model_type, &frame);
                drop(in_flight);
                // The coordinator may have stopped listening after a join timeout.
                let _ = tx.send((index, result));
            });
        match spawned {
            Ok(_) => pending.push(index),
            Err(err) => {
                log::warn!(
                    "failed to dispatch backend '{}': {}",
                    slot.model_type(),
                    err
                );
                collected.push((index, RecognitionResult::failed(slot.model_type())));
            }
        }
    }
    drop(tx);

    let deadline = settings.join_timeout.map(|timeout| started + timeout);
    let (arrived, unreported) = collect_results(&rx, pending, deadline);
    collected.extend(arrived);
    for index in unreported {
        slots[index].mark_stalled();
        collected.push((index, RecognitionResult::failed(slots[index].model_type())));
    }

    log::info!(
        "recognition finished: {} result(s) from {} model(s) in {:.2?}",
        collected.len(),
        slots.len(),
        started.elapsed()
    );
    order_results(collected, settings.result_order)
}

/// Receive worker results in arrival order until every pending slot has
/// reported, the deadline passes, or every worker is gone.
///
/// Returns the results and the slots that never reported.
fn collect_results(
    rx: &mpsc::Receiver<(usize, RecognitionResult)>,
    mut pending: Vec<usize>,
    deadline: Option<Instant>,
) -> (Vec<(usize, RecognitionResult)>, Vec<usize>) {
    let mut arrived = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let received = match deadline {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match received {
            Ok((index, result)) => {
                pending.retain(|&p| p != index);
                arrived.push((index, result));
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("join timeout; {} backend(s) still running", pending.len());
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("{} backend worker(s) exited without reporting", pending.len());
                break;
            }
        }
    }
    (arrived, pending)
}

fn order_results(
    mut collected: Vec<(usize, RecognitionResult)>,
    order: ResultOrder,
) -> Vec<RecognitionResult> {
    if order == ResultOrder::Configured {
        collected.sort_by_key(|(index, _)| *index);
    }
    collected.into_iter().map(|(_, result)| result).collect()
}

fn run_backend(backend: &SharedBackend, model_type: &str, frame: &RgbFrame) -> RecognitionResult {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Vec<RawObservation>> {
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.infer(frame)
    }));
    match outcome {
        Ok(Ok(observations)) => normalize(observations, model_type),
        Ok(Err(err)) => {
            log::warn!("model '{}' inference failed: {:#}", model_type, err);
            RecognitionResult::failed(model_type)
        }
        Err(_) => {
            log::warn!("model '{}' panicked during inference", model_type);
            RecognitionResult::failed(model_type)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, ClassLabel, RecognitionBackend, StubBackend};
    use crate::frame::{PixelFormat, RawImage};
    use std::sync::atomic::Ordering;

    fn frame() -> RgbFrame {
        RgbFrame::filled(4, 4, [20, 40, 60]).unwrap()
    }

    fn recognizer(backends: Vec<StubBackend>, settings: RecognizerSettings) -> Recognizer {
        let mut registry = BackendRegistry::new();
        for backend in backends {
            registry.register(backend).unwrap();
        }
        Recognizer::with_settings(registry, settings).unwrap()
    }

    fn types(results: &[RecognitionResult]) -> Vec<&str> {
        results.iter().map(|r| r.model_type.as_str()).collect()
    }

    #[test]
    fn result_order_parses() {
        assert_eq!("completion".parse::<ResultOrder>().unwrap(), ResultOrder::Completion);
        assert_eq!("Configured".parse::<ResultOrder>().unwrap(), ResultOrder::Configured);
        assert!("random".parse::<ResultOrder>().is_err());
    }

    #[test]
    fn one_result_per_usable_backend() {
        let r = recognizer(
            vec![
                StubBackend::new("a")
                    .with_observations(vec![RawObservation::classification("x", 0.5)]),
                StubBackend::new("missing").unusable(),
                StubBackend::new("broken").failing("boom"),
            ],
            RecognizerSettings {
                result_order: ResultOrder::Configured,
                join_timeout: None,
            },
        );
        let results = r.recognize_blocking(&frame()).unwrap();
        assert_eq!(types(&results), vec!["a", "broken"]);
        assert_eq!(results[0].predictions.as_ref().unwrap().len(), 1);
        assert!(results[1].is_failure());
    }

    #[test]
    fn unusable_backend_is_never_invoked() {
        let missing = StubBackend::new("missing").unusable();
        let calls = missing.call_counter();
        let r = recognizer(vec![missing], RecognizerSettings::default());
        let results = r.recognize_blocking(&frame()).unwrap();
        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn conversion_failure_skips_every_backend() {
        let backend = StubBackend::new("a");
        let calls = backend.call_counter();
        let r = recognizer(vec![backend], RecognizerSettings::default());
        let bad = RawImage::new(vec![1, 2, 3], 2, 2, PixelFormat::Rgb24);
        assert!(r.recognize_blocking(&bad).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_backend_yields_failure_result() {
        let r = recognizer(
            vec![StubBackend::new("panics").panicking(), StubBackend::new("ok")],
            RecognizerSettings {
                result_order: ResultOrder::Configured,
                join_timeout: None,
            },
        );
        let results = r.recognize_blocking(&frame()).unwrap();
        assert_eq!(types(&results), vec!["panics", "ok"]);
        assert!(results[0].is_failure());
        assert_eq!(results[1].predictions, Some(Vec::new()));

        // The poisoned backend keeps failing instead of taking the batch down.
        let again = r.recognize_blocking(&frame()).unwrap();
        assert!(again[0].is_failure());
        assert!(!again[1].is_failure());
    }

    #[test]
    fn configured_order_overrides_completion_order() {
        let r = recognizer(
            vec![
                StubBackend::new("slow").with_delay(Duration::from_millis(150)),
                StubBackend::new("fast"),
            ],
            RecognizerSettings {
                result_order: ResultOrder::Configured,
                join_timeout: None,
            },
        );
        let results = r.recognize_blocking(&frame()).unwrap();
        assert_eq!(types(&results), vec!["slow", "fast"]);
    }

    #[test]
    fn results_keep_arrival_order_unless_configured() {
        let (tx, rx) = mpsc::channel();
        tx.send((1, RecognitionResult::failed("second"))).unwrap();
        tx.send((0, RecognitionResult::failed("first"))).unwrap();
        drop(tx);

        let (arrived, unreported) = collect_results(&rx, vec![0, 1], None);
        assert!(unreported.is_empty());
        let completion = order_results(arrived.clone(), ResultOrder::Completion);
        assert_eq!(types(&completion), vec!["second", "first"]);
        let configured = order_results(arrived, ResultOrder::Configured);
        assert_eq!(types(&configured), vec!["first", "second"]);
    }

    #[test]
    fn collection_stops_at_deadline_or_when_workers_vanish() {
        let (tx, rx) = mpsc::channel::<(usize, RecognitionResult)>();
        tx.send((2, RecognitionResult::failed("done"))).unwrap();
        let deadline = Some(Instant::now() + Duration::from_millis(20));
        let (arrived, unreported) = collect_results(&rx, vec![2, 5], deadline);
        assert_eq!(arrived.len(), 1);
        assert_eq!(unreported, vec![5]);

        drop(tx);
        let (arrived, unreported) = collect_results(&rx, vec![7], None);
        assert!(arrived.is_empty());
        assert_eq!(unreported, vec![7]);
    }

    #[test]
    fn batch_completes_only_after_every_backend_reports() {
        let (release, gate) = mpsc::channel();
        let fast = StubBackend::new("fast");
        let fast_calls = fast.call_counter();
        let r = recognizer(
            vec![StubBackend::new("slow").gated(gate), fast],
            RecognizerSettings::default(),
        );
        let (tx, rx) = mpsc::channel();
        r.recognize(&frame(), move |results| tx.send(results).unwrap())
            .unwrap();
        while fast_calls.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        release.send(()).unwrap();
        let results = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        let mut seen = types(&results);
        seen.sort_unstable();
        assert_eq!(seen, vec!["fast", "slow"]);
    }

    #[test]
    fn join_timeout_marks_hung_backends_failed() {
        let (release, gate) = mpsc::channel::<()>();
        let r = recognizer(
            vec![StubBackend::new("hung").gated(gate), StubBackend::new("fast")],
            RecognizerSettings {
                result_order: ResultOrder::Configured,
                join_timeout: Some(Duration::from_millis(100)),
            },
        );
        let results = r.recognize_blocking(&frame()).unwrap();
        assert_eq!(types(&results), vec!["hung", "fast"]);
        assert!(results[0].is_failure());
        assert!(!results[1].is_failure());
        drop(release);
    }

    #[test]
    fn stalled_backend_is_not_dispatched_again() {
        let (release, gate) = mpsc::channel::<()>();
        let hung = StubBackend::new("hung").gated(gate);
        let hung_calls = hung.call_counter();
        let r = recognizer(
            vec![hung, StubBackend::new("fast")],
            RecognizerSettings {
                result_order: ResultOrder::Configured,
                join_timeout: Some(Duration::from_millis(50)),
            },
        );

        for _ in 0..3 {
            let results = r.recognize_blocking(&frame()).unwrap();
            assert_eq!(types(&results), vec!["hung", "fast"]);
            assert!(results[0].is_failure());
            assert!(!results[1].is_failure());
        }
        // Only the first call reached the backend; later calls did not pile
        // more workers onto its lock.
        assert_eq!(hung_calls.load(Ordering::SeqCst), 1);

        // Once the stuck call finishes the slot is dispatched again.
        drop(release);
        let started = Instant::now();
        loop {
            let results = r.recognize_blocking(&frame()).unwrap();
            if !results[0].is_failure() {
                break;
            }
            assert!(started.elapsed() < Duration::from_secs(5), "slot never recovered");
            thread::yield_now();
        }
        assert!(hung_calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn usability_is_checked_on_every_call() {
        let backend = StubBackend::new("swappable");
        let availability = backend.availability();
        let calls = backend.call_counter();
        let shared: SharedBackend = Arc::new(std::sync::Mutex::new(backend));
        let mut registry = BackendRegistry::new();
        registry.register_shared(shared).unwrap();
        let r = Recognizer::new(registry).unwrap();

        assert_eq!(r.recognize_blocking(&frame()).unwrap().len(), 1);

        availability.set_usable(false);
        assert!(r.recognize_blocking(&frame()).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        availability.set_usable(true);
        assert_eq!(r.recognize_blocking(&frame()).unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn async_completion_runs_once_on_completion_thread() {
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.2).unwrap();
        let r = recognizer(
            vec![StubBackend::new("loc").with_observations(vec![RawObservation::localization(
                bbox,
                vec![ClassLabel::new("cup", 0.6)],
            )])],
            RecognizerSettings::default(),
        );
        let (tx, rx) = mpsc::channel();
        r.recognize(&frame(), move |results| {
            tx.send((results, thread::current().id())).unwrap();
        })
        .unwrap();

        let (results, thread_id) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(thread_id, r.completion_thread());
        let results = results.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].top().unwrap().label, "cup");
        // Sender dropped with the callback: no second delivery.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn async_conversion_failure_completes_with_none() {
        let r = recognizer(vec![StubBackend::new("a")], RecognizerSettings::default());
        let (tx, rx) = mpsc::channel();
        let bad = RawImage::new(Vec::new(), 0, 0, PixelFormat::Gray8);
        r.recognize(&bad, move |results| tx.send(results).unwrap())
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_none());
    }
}
