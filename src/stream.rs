//! Per-frame recognition over a sequence of frames.
//!
//! Frame timing belongs to the caller: the stream pulls the next frame only
//! after the previous one has been handed to the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::detect::{suppress_duplicates, RecognitionResult};
use crate::frame::ImageInput;
use crate::recognizer::Recognizer;

/// Receiver of per-frame recognition results.
pub trait RecognitionSink {
    /// `results` is `None` when the frame could not be converted.
    fn frame_recognized(&mut self, index: u64, results: Option<&[RecognitionResult]>)
        -> Result<()>;
}

impl<F> RecognitionSink for F
where
    F: FnMut(u64, Option<&[RecognitionResult]>) -> Result<()>,
{
    fn frame_recognized(
        &mut self,
        index: u64,
        results: Option<&[RecognitionResult]>,
    ) -> Result<()> {
        self(index, results)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames: u64,
    /// Frames that could not be converted.
    pub rejected_frames: u64,
    pub elapsed: Duration,
}

pub struct FrameStream<'a> {
    recognizer: &'a Recognizer,
    frame_limit: Option<u64>,
    stop: Option<Arc<AtomicBool>>,
    suppress_duplicates: bool,
}

impl<'a> FrameStream<'a> {
    pub fn new(recognizer: &'a Recognizer) -> Self {
        Self {
            recognizer,
            frame_limit: None,
            stop: None,
            suppress_duplicates: false,
        }
    }

    pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
        self.frame_limit = frame_limit;
        self
    }

    /// Stop before the next frame once `stop` is set.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Drop same-object duplicates within each model's predictions.
    pub fn with_duplicate_suppression(mut self, enabled: bool) -> Self {
        self.suppress_duplicates = enabled;
        self
    }

    pub fn run<I, S>(&self, frames: impl IntoIterator<Item = I>, sink: &mut S) -> Result<StreamStats>
    where
        I: ImageInput,
        S: RecognitionSink + ?Sized,
    {
        let started = Instant::now();
        let mut stats = StreamStats::default();
        for frame in frames {
            if self.stop.as_ref().is_some_and(|s| s.load(Ordering::SeqCst)) {
                log::warn!("stop requested, leaving frame loop");
                break;
            }
            if self.frame_limit.is_some_and(|limit| stats.frames >= limit) {
                log::info!("frame limit {} reached", stats.frames);
                break;
            }

            let index = stats.frames;
            stats.frames += 1;
            let results = self.recognizer.recognize_blocking(&frame).map(|results| {
                if self.suppress_duplicates {
                    results.into_iter().map(dedup_result).collect()
                } else {
                    results
                }
            });
            if results.is_none() {
                stats.rejected_frames += 1;
            }
            log::debug!("frame {} recognized", index);
            sink.frame_recognized(index, results.as_deref())?;
        }
        stats.elapsed = started.elapsed();
        Ok(stats)
    }
}

fn dedup_result(result: RecognitionResult) -> RecognitionResult {
    RecognitionResult {
        predictions: result.predictions.map(|p| suppress_duplicates(&p)),
        model_type: result.model_type,
    }
}
