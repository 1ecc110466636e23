//! Geometric overlap scoring between detections.
//!
//! The score is a containment measure, not IoU: the intersection is divided by the
//! area of the *first* box only. `a.overlap(b)` answers "how much of `a` is covered
//! by `b`", so the measure is directional and `is_same` is neither symmetric nor
//! transitive. Do not cluster with it as if it were an equivalence relation.

use super::result::{BoundingBox, Detection};

/// Overlap above which two detections are treated as the same object.
pub const SAME_OBJECT_THRESHOLD: f32 = 0.2;

/// Intersection area of `a` and `b` divided by the area of `a`.
///
/// Returns 0 when `a` has zero area. The result is always within [0, 1].
pub fn box_overlap(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x_overlap = (a.max_x().min(b.max_x()) - a.min_x().max(b.min_x())).max(0.0);
    let y_overlap = (a.max_y().min(b.max_y()) - a.min_y().max(b.min_y())).max(0.0);
    let area = a.area();
    if !(area > 0.0 && area.is_finite()) {
        return 0.0;
    }
    (x_overlap * y_overlap / area).clamp(0.0, 1.0)
}

impl Detection {
    /// Fraction of this detection's box covered by `other`'s box.
    ///
    /// 0 when either detection has no box.
    pub fn overlap(&self, other: &Detection) -> f32 {
        match (&self.bbox, &other.bbox) {
            (Some(a), Some(b)) => box_overlap(a, b),
            _ => 0.0,
        }
    }

    pub fn is_same(&self, other: &Detection) -> bool {
        self.overlap(other) > SAME_OBJECT_THRESHOLD
    }
}

/// Greedy duplicate removal over confidence-sorted detections.
///
/// A detection is dropped when it `is_same` as one already kept. Detections
/// without a box are always kept.
pub fn suppress_duplicates(detections: &[Detection]) -> Vec<Detection> {
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept.iter().any(|k| candidate.is_same(k)) {
            continue;
        }
        kept.push(candidate.clone());
    }
    kept
}
