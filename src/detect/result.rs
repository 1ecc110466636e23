use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis-aligned rectangle in normalized image coordinates.
///
/// Construction guarantees `min_x <= max_x`, `min_y <= max_y` and a finite
/// area. Deserialization goes through the same checks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoxCorners")]
pub struct BoundingBox {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

impl BoundingBox {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Result<Self> {
        if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) {
            return Err(anyhow!(
                "bounding box has non-finite coordinates ({}, {}, {}, {})",
                min_x,
                min_y,
                max_x,
                max_y
            ));
        }
        if min_x > max_x {
            return Err(anyhow!("bounding box min_x > max_x ({} > {})", min_x, max_x));
        }
        if min_y > max_y {
            return Err(anyhow!("bounding box min_y > max_y ({} > {})", min_y, max_y));
        }
        let bbox = Self {
            min_x,
            min_y,
            max_x,
            max_y,
        };
        if !bbox.area().is_finite() {
            return Err(anyhow!(
                "bounding box extent overflows ({} x {})",
                bbox.width(),
                bbox.height()
            ));
        }
        Ok(bbox)
    }

    /// Build from origin and size.
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Result<Self> {
        Self::new(x, y, x + w, y + h)
    }

    pub fn min_x(&self) -> f32 {
        self.min_x
    }

    pub fn min_y(&self) -> f32 {
        self.min_y
    }

    pub fn max_x(&self) -> f32 {
        self.max_x
    }

    pub fn max_y(&self) -> f32 {
        self.max_y
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

#[derive(Deserialize)]
struct BoxCorners {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

impl TryFrom<BoxCorners> for BoundingBox {
    type Error = anyhow::Error;

    fn try_from(c: BoxCorners) -> Result<Self> {
        BoundingBox::new(c.min_x, c.min_y, c.max_x, c.max_y)
    }
}

/// Opaque identifier of one detection instance. Not stable across calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionId(Uuid);

impl DetectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DetectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One normalized prediction from one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub id: DetectionId,
    /// Present for localizing models, absent for pure classifiers.
    pub bbox: Option<BoundingBox>,
}

/// Outcome of one model for one recognition call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// `None` when the model failed; `Some(vec![])` when it ran and found nothing.
    /// Sorted by confidence, descending; ties keep backend order.
    pub predictions: Option<Vec<Detection>>,
    /// Model that produced this result.
    #[serde(rename = "type")]
    pub model_type: String,
}

impl RecognitionResult {
    pub fn failed(model_type: impl Into<String>) -> Self {
        Self {
            predictions: None,
            model_type: model_type.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.predictions.is_none()
    }

    /// Highest-confidence detection, if any.
    pub fn top(&self) -> Option<&Detection> {
        self.predictions.as_ref().and_then(|p| p.first())
    }
}
