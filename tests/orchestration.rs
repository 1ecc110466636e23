use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

use ensemble_recognizer::detect::backends::cpu::BRIGHT_REGION_LABEL;
use ensemble_recognizer::detect::{LumaLocalizer, StubBackend};
use ensemble_recognizer::{
    BackendRegistry, BoundingBox, Detection, DetectionId, PixelFormat, RawImage,
    RawObservation, RecognitionResult, Recognizer, RecognizerSettings, ResultOrder, RgbFrame,
    DEFAULT_OBJECT_LABEL,
};

const WAIT: Duration = Duration::from_secs(10);

fn frame() -> RgbFrame {
    RgbFrame::filled(16, 16, [90, 90, 90]).unwrap()
}

fn detection(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Detection {
    Detection {
        label: "thing".to_string(),
        confidence: 0.5,
        id: DetectionId::new(),
        bbox: Some(BoundingBox::new(min_x, min_y, max_x, max_y).unwrap()),
    }
}

fn recognize_async(recognizer: &Recognizer, image: &RawImage) -> Option<Vec<RecognitionResult>> {
    let (tx, rx) = mpsc::channel();
    recognizer
        .recognize(image, move |results| tx.send(results).unwrap())
        .unwrap();
    let results = rx.recv_timeout(WAIT).expect("completion delivered");
    // The callback (and its sender) is consumed by the single delivery.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    results
}

#[test]
fn failing_backend_does_not_abort_the_batch() {
    let mut registry = BackendRegistry::new();
    registry
        .register(StubBackend::new("A").with_observations(vec![
            RawObservation::classification("cat", 0.4),
            RawObservation::classification("dog", 0.9),
            RawObservation::classification("cow", 0.4),
        ]))
        .unwrap();
    registry
        .register(StubBackend::new("B").failing("device lost"))
        .unwrap();
    registry
        .register(StubBackend::new("C").with_observations(Vec::new()))
        .unwrap();
    let recognizer = Recognizer::new(registry).unwrap();

    let image = RawImage::new(vec![128u8; 4 * 4 * 3], 4, 4, PixelFormat::Rgb24);
    let results = recognize_async(&recognizer, &image).expect("image converts");
    assert_eq!(results.len(), 3);

    let by_type = |t: &str| results.iter().find(|r| r.model_type == t).unwrap();
    let a = by_type("A").predictions.as_ref().unwrap();
    let labels: Vec<&str> = a.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["dog", "cat", "cow"]);
    assert!(a.windows(2).all(|w| w[0].confidence >= w[1].confidence));

    assert_eq!(by_type("B").predictions, None);
    assert_eq!(by_type("C").predictions, Some(Vec::new()));
}

#[test]
fn result_count_excludes_unusable_backends() {
    let mut registry = BackendRegistry::new();
    let mut counters = Vec::new();
    for name in ["one", "two", "three", "four"] {
        let backend = StubBackend::new(name);
        counters.push(backend.call_counter());
        registry.register(backend).unwrap();
    }
    let skipped = StubBackend::new("offline").unusable();
    let skipped_calls = skipped.call_counter();
    registry.register(skipped).unwrap();
    registry
        .register_unavailable("broken-load", ensemble_recognizer::BackendKind::Classifier, "bad file")
        .unwrap();
    let recognizer = Recognizer::new(registry).unwrap();

    let results = recognizer.recognize_blocking(&frame()).unwrap();
    assert_eq!(results.len(), 4);
    let types: HashSet<&str> = results.iter().map(|r| r.model_type.as_str()).collect();
    assert_eq!(types, HashSet::from(["one", "two", "three", "four"]));
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn conversion_failure_completes_with_none_and_runs_nothing() {
    let backend = StubBackend::new("a");
    let calls = backend.call_counter();
    let mut registry = BackendRegistry::new();
    registry.register(backend).unwrap();
    let recognizer = Recognizer::new(registry).unwrap();

    let odd_nv12 = RawImage::new(vec![0u8; 9], 3, 2, PixelFormat::Nv12);
    assert!(recognize_async(&recognizer, &odd_nv12).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn no_usable_backends_completes_with_empty_collection() {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new("off").unusable()).unwrap();
    let recognizer = Recognizer::new(registry).unwrap();
    let image = RawImage::new(vec![10u8; 4], 2, 2, PixelFormat::Gray8);
    assert_eq!(recognize_async(&recognizer, &image), Some(Vec::new()));
}

#[test]
fn unlabeled_localization_gets_default_label() {
    let bbox = BoundingBox::from_xywh(0.1, 0.1, 0.3, 0.3).unwrap();
    let mut registry = BackendRegistry::new();
    registry
        .register(
            StubBackend::new("loc")
                .with_observations(vec![RawObservation::localization(bbox, Vec::new())]),
        )
        .unwrap();
    let recognizer = Recognizer::new(registry).unwrap();

    let results = recognizer.recognize_blocking(&frame()).unwrap();
    let top = results[0].top().unwrap();
    assert_eq!(top.label, DEFAULT_OBJECT_LABEL);
    assert_eq!(top.confidence, 0.0);
    assert_eq!(top.bbox, Some(bbox));
}

#[test]
fn configured_order_is_stable_across_calls() {
    let mut registry = BackendRegistry::new();
    registry
        .register(StubBackend::new("first").with_delay(Duration::from_millis(80)))
        .unwrap();
    registry.register(StubBackend::new("second")).unwrap();
    registry
        .register(StubBackend::new("third").with_delay(Duration::from_millis(40)))
        .unwrap();
    let recognizer = Recognizer::with_settings(
        registry,
        RecognizerSettings {
            result_order: ResultOrder::Configured,
            join_timeout: None,
        },
    )
    .unwrap();

    for _ in 0..3 {
        let results = recognizer.recognize_blocking(&frame()).unwrap();
        let types: Vec<&str> = results.iter().map(|r| r.model_type.as_str()).collect();
        assert_eq!(types, vec!["first", "second", "third"]);
    }
}

#[test]
fn overlap_scenarios() {
    let a = detection(0.0, 0.0, 10.0, 10.0);
    let b = detection(5.0, 5.0, 15.0, 15.0);
    assert!((a.overlap(&b) - 0.25).abs() < 1e-6);
    assert!((b.overlap(&a) - 0.25).abs() < 1e-6);
    assert!(a.is_same(&b));

    let small = detection(0.0, 0.0, 10.0, 10.0);
    let large = detection(0.0, 0.0, 100.0, 100.0);
    assert!((small.overlap(&large) - 1.0).abs() < 1e-6);
    assert!((large.overlap(&small) - 0.01).abs() < 1e-6);
    assert!(small.is_same(&large));
    assert!(!large.is_same(&small));

    let disjoint = detection(20.0, 20.0, 30.0, 30.0);
    assert_eq!(a.overlap(&disjoint), 0.0);
    assert!(!a.is_same(&disjoint));
}

#[test]
fn luma_localizer_finds_bright_square() {
    // 16x16 dark frame with a white 8x8 block in the top-left quadrant.
    let mut data = vec![0u8; 16 * 16 * 3];
    for y in 0..8 {
        for x in 0..8 {
            let at = (y * 16 + x) * 3;
            data[at..at + 3].copy_from_slice(&[255, 255, 255]);
        }
    }
    let image = RawImage::new(data, 16, 16, PixelFormat::Rgb24);

    let mut registry = BackendRegistry::new();
    registry
        .register(LumaLocalizer::new("bright").with_grid(4).unwrap())
        .unwrap();
    let recognizer = Recognizer::new(registry).unwrap();

    let results = recognizer.recognize_blocking(&image).unwrap();
    let predictions = results[0].predictions.as_ref().unwrap();
    assert_eq!(predictions.len(), 1);
    let region = &predictions[0];
    assert_eq!(region.label, BRIGHT_REGION_LABEL);
    assert!((region.confidence - 1.0).abs() < 1e-3);
    let bbox = region.bbox.unwrap();
    assert!((bbox.min_x() - 0.0).abs() < 1e-6 && (bbox.max_x() - 0.5).abs() < 1e-6);
    assert!((bbox.min_y() - 0.0).abs() < 1e-6 && (bbox.max_y() - 0.5).abs() < 1e-6);
}

#[test]
fn results_serialize_with_type_key() {
    let mut registry = BackendRegistry::new();
    registry
        .register(
            StubBackend::new("objects")
                .with_observations(vec![RawObservation::classification("mug", 0.7)]),
        )
        .unwrap();
    registry.register(StubBackend::new("down").failing("x")).unwrap();
    let recognizer = Recognizer::with_settings(
        registry,
        RecognizerSettings {
            result_order: ResultOrder::Configured,
            join_timeout: None,
        },
    )
    .unwrap();
    let results = recognizer.recognize_blocking(&frame()).unwrap();
    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json[0]["type"], "objects");
    assert_eq!(json[0]["predictions"][0]["label"], "mug");
    assert!(json[1]["predictions"].is_null());
}
