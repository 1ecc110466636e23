#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{BackendKind, RecognitionBackend};
use crate::detect::observation::RawObservation;
use crate::frame::RgbFrame;

pub const DEFAULT_TOP_K: usize = 5;

/// Tract-based ONNX image classifier.
///
/// Loads a local model with a `1x3xHxW` float input, resizes each frame to the
/// model input and reports the top-k classes as classification observations.
pub struct OnnxClassifier {
    model_type: String,
    model: TypedRunnableModel<TypedModel>,
    labels: Vec<String>,
    width: u32,
    height: u32,
    top_k: usize,
}

impl OnnxClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_type: impl Into<String>,
        model_path: P,
        labels: Vec<String>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model_type: model_type.into(),
            model,
            labels,
            width,
            height,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Override how many classes are reported per frame.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    fn build_input(&self, frame: &RgbFrame) -> Result<Tensor> {
        let resized = frame.resize_nearest(self.width, self.height)?;
        let pixels = resized.pixels();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_scores(&self, outputs: TVec<TValue>) -> Result<Vec<f32>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        if scores.is_empty() {
            return Err(anyhow!("model produced an empty score tensor"));
        }
        Ok(into_distribution(scores))
    }

    fn label_for(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }
}

/// Apply softmax unless the scores already form a probability distribution.
fn into_distribution(scores: Vec<f32>) -> Vec<f32> {
    let in_range = scores.iter().all(|s| (0.0..=1.0).contains(s));
    let sum: f32 = scores.iter().sum();
    if in_range && (sum - 1.0).abs() < 1e-3 {
        return scores;
    }
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

impl RecognitionBackend for OnnxClassifier {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Classifier
    }

    fn infer(&mut self, frame: &RgbFrame) -> Result<Vec<RawObservation>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let scores = self.extract_scores(outputs)?;

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked
            .into_iter()
            .take(self.top_k)
            .map(|(index, score)| RawObservation::classification(self.label_for(index), score))
            .collect())
    }
}

/// Read a newline-separated labels file, ignoring blank lines.
pub fn read_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
