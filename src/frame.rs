//! Image input boundary.
//!
//! Backends consume one native pixel format: tightly packed RGB24 (`RgbFrame`).
//! Callers hand the recognizer anything implementing `ImageInput`; the conversion
//! happens once per recognition call, before any backend runs.
//!
//! - `RgbFrame`: validated RGB24 buffer shared (read-only) by all backends of a call.
//! - `RawImage`: caller-owned bytes in one of the supported `PixelFormat`s.
//! - `image::DynamicImage` (feature `image-decode`): decoded image files.
//!
//! Conversion failure is reported as `None`, never as an error.

mod normalize;

use anyhow::{anyhow, Result};

pub use normalize::PixelFormat;

/// Packed RGB24 frame. The only pixel format backends ever see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RgbFrame {
    /// Wrap a packed RGB24 buffer. Rejects empty dimensions and length mismatches.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has empty dimensions {}x{}", width, height));
        }
        let expected = normalize::rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Frame filled with a single color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = normalize::rgb_len(width, height)?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Self::new(data, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at (x, y). Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// BT.601 luma at (x, y), in 0..=255.
    pub fn luma(&self, x: u32, y: u32) -> f32 {
        let [r, g, b] = self.pixel(x, y);
        0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
    }

    pub fn resize_nearest(&self, width: u32, height: u32) -> Result<Self> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        let data = normalize::resize_nearest(&self.data, self.width, self.height, width, height)?;
        Self::new(data, width, height)
    }
}

/// Anything the recognizer can turn into its native pixel format.
pub trait ImageInput {
    /// Convert to RGB24. `None` means the image cannot be processed at all.
    fn to_rgb_frame(&self) -> Option<RgbFrame>;
}

impl ImageInput for RgbFrame {
    fn to_rgb_frame(&self) -> Option<RgbFrame> {
        Some(self.clone())
    }
}

/// Caller-owned pixel buffer with an explicit layout.
#[derive(Clone, Debug)]
pub struct RawImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }
}

impl ImageInput for RawImage {
    fn to_rgb_frame(&self) -> Option<RgbFrame> {
        let converted = normalize::normalize_to_rgb(&self.data, self.width, self.height, self.format)
            .and_then(|rgb| RgbFrame::new(rgb, self.width, self.height));
        match converted {
            Ok(frame) => Some(frame),
            Err(err) => {
                log::debug!("image conversion failed: {:#}", err);
                None
            }
        }
    }
}

#[cfg(feature = "image-decode")]
impl ImageInput for image::DynamicImage {
    fn to_rgb_frame(&self) -> Option<RgbFrame> {
        let rgb = self.to_rgb8();
        let (width, height) = rgb.dimensions();
        RgbFrame::new(rgb.into_raw(), width, height).ok()
    }
}

#[cfg(feature = "image-decode")]
impl ImageInput for image::RgbImage {
    fn to_rgb_frame(&self) -> Option<RgbFrame> {
        let (width, height) = self.dimensions();
        RgbFrame::new(self.as_raw().clone(), width, height).ok()
    }
}
