use anyhow::{anyhow, Result};

use crate::detect::backend::{BackendKind, RecognitionBackend};
use crate::detect::observation::{ClassLabel, RawObservation};
use crate::detect::result::BoundingBox;
use crate::frame::RgbFrame;

pub const DEFAULT_GRID: u32 = 8;
pub const DEFAULT_LUMA_THRESHOLD: f32 = 0.75;
pub const BRIGHT_REGION_LABEL: &str = "bright_region";

/// CPU localizer for bright regions.
///
/// The frame is split into a `grid x grid` lattice. Cells whose mean luma
/// (as a fraction of 255) reaches the threshold are marked, and 4-connected
/// marked cells are merged into one region. Each region yields one localization
/// whose confidence is the region's mean luma.
pub struct LumaLocalizer {
    model_type: String,
    grid: u32,
    threshold: f32,
}

impl LumaLocalizer {
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            grid: DEFAULT_GRID,
            threshold: DEFAULT_LUMA_THRESHOLD,
        }
    }

    pub fn with_grid(mut self, grid: u32) -> Result<Self> {
        if grid == 0 {
            return Err(anyhow!("luma localizer grid must be >= 1"));
        }
        self.grid = grid;
        Ok(self)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "luma threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        self.threshold = threshold;
        Ok(self)
    }

    fn cell_means(frame: &RgbFrame, cols: u32, rows: u32) -> Vec<f32> {
        let (w, h) = (frame.width(), frame.height());
        let mut means = Vec::with_capacity(cols as usize * rows as usize);
        for cy in 0..rows {
            let (y0, y1) = (cell_edge(cy, h, rows), cell_edge(cy + 1, h, rows));
            for cx in 0..cols {
                let (x0, x1) = (cell_edge(cx, w, cols), cell_edge(cx + 1, w, cols));
                let mut sum = 0.0f32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += frame.luma(x, y);
                    }
                }
                let count = (u64::from(x1 - x0) * u64::from(y1 - y0)).max(1) as f32;
                means.push(sum / count / 255.0);
            }
        }
        means
    }
}

/// Pixel coordinate where cell `index` of `cells` starts along an axis of
/// `extent` pixels. Computed in 64 bits; the result never exceeds `extent`.
fn cell_edge(index: u32, extent: u32, cells: u32) -> u32 {
    (u64::from(index) * u64::from(extent) / u64::from(cells)) as u32
}

struct Region {
    min_cx: u32,
    min_cy: u32,
    max_cx: u32,
    max_cy: u32,
    luma_sum: f32,
    cells: u32,
}

impl RecognitionBackend for LumaLocalizer {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Localizer
    }

    fn infer(&mut self, frame: &RgbFrame) -> Result<Vec<RawObservation>> {
        let cols = self.grid.min(frame.width());
        let rows = self.grid.min(frame.height());
        let means = Self::cell_means(frame, cols, rows);
        let mut visited = vec![false; means.len()];
        let mut regions = Vec::new();

        for seed in 0..means.len() {
            if visited[seed] || means[seed] < self.threshold {
                continue;
            }
            visited[seed] = true;
            let mut region = Region {
                min_cx: u32::MAX,
                min_cy: u32::MAX,
                max_cx: 0,
                max_cy: 0,
                luma_sum: 0.0,
                cells: 0,
            };
            let mut stack = vec![seed];
            while let Some(idx) = stack.pop() {
                let (cx, cy) = ((idx % cols as usize) as u32, (idx / cols as usize) as u32);
                region.min_cx = region.min_cx.min(cx);
                region.min_cy = region.min_cy.min(cy);
                region.max_cx = region.max_cx.max(cx);
                region.max_cy = region.max_cy.max(cy);
                region.luma_sum += means[idx];
                region.cells += 1;

                let mut neighbours = Vec::with_capacity(4);
                if cx > 0 {
                    neighbours.push(idx - 1);
                }
                if cx + 1 < cols {
                    neighbours.push(idx + 1);
                }
                if cy > 0 {
                    neighbours.push(idx - cols as usize);
                }
                if cy + 1 < rows {
                    neighbours.push(idx + cols as usize);
                }
                for next in neighbours {
                    if !visited[next] && means[next] >= self.threshold {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }
            regions.push(region);
        }

        let (w, h) = (frame.width() as f32, frame.height() as f32);
        regions
            .into_iter()
            .map(|r| -> Result<RawObservation> {
                let bbox = BoundingBox::new(
                    cell_edge(r.min_cx, frame.width(), cols) as f32 / w,
                    cell_edge(r.min_cy, frame.height(), rows) as f32 / h,
                    cell_edge(r.max_cx + 1, frame.width(), cols) as f32 / w,
                    cell_edge(r.max_cy + 1, frame.height(), rows) as f32 / h,
                )?;
                let confidence = r.luma_sum / r.cells as f32;
                Ok(RawObservation::localization(
                    bbox,
                    vec![ClassLabel::new(BRIGHT_REGION_LABEL, confidence)],
                ))
            })
            .collect()
    }
}
