//! Ensemble Recognizer
//!
//! Runs one image through several object-recognition models at once and joins
//! their answers into a single, uniformly shaped collection.
//!
//! # Architecture
//!
//! A recognition call follows the same path every time:
//!
//! 1. **Convert once**: the caller's image becomes an `RgbFrame`. A failed
//!    conversion completes the call with `None` and no model runs.
//! 2. **Fan out**: every usable backend runs concurrently on its own worker.
//! 3. **Normalize**: raw classifications and localizations become
//!    `Detection`s sorted by descending confidence.
//! 4. **Join**: one coordinator collects exactly one `RecognitionResult` per
//!    usable backend and delivers the collection once, on the completion thread.
//!
//! # Module Structure
//!
//! - `frame`: image input boundary (RgbFrame, RawImage, PixelFormat)
//! - `detect`: result model, overlap scoring, normalization, backends, registry
//! - `recognizer`: the orchestrator (Recognizer, ResultOrder)
//! - `dispatch`: serialized completion context
//! - `stream`: per-frame recognition over a frame sequence
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod frame;
pub mod recognizer;
pub mod stream;

pub use config::{ModelKind, ModelSpec, RecognizerConfig};
pub use detect::{
    box_overlap, normalize, suppress_duplicates, Availability, BackendKind, BackendRegistry,
    BoundingBox, ClassLabel, Detection, DetectionId, RawObservation, RecognitionBackend,
    RecognitionResult, DEFAULT_OBJECT_LABEL, SAME_OBJECT_THRESHOLD,
};
pub use dispatch::{CompletionHandle, CompletionQueue};
pub use frame::{ImageInput, PixelFormat, RawImage, RgbFrame};
pub use recognizer::{Recognizer, RecognizerSettings, ResultOrder};
pub use stream::{FrameStream, RecognitionSink, StreamStats};
