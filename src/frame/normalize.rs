use anyhow::{anyhow, Result};

/// Pixel layouts accepted by `RawImage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Gray8,
    Nv12,
}

impl PixelFormat {
    fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "RGB",
            PixelFormat::Rgba32 => "RGBA",
            PixelFormat::Gray8 => "Gray8",
            PixelFormat::Nv12 => "NV12",
        }
    }

    /// Storage cost in half-bytes per pixel (NV12 carries 12 bits per pixel).
    fn nibbles_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 6,
            PixelFormat::Rgba32 => 8,
            PixelFormat::Gray8 => 2,
            PixelFormat::Nv12 => 3,
        }
    }
}

/// Exact buffer length of a `width x height` frame in `format`.
fn frame_len(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(format.nibbles_per_pixel()))
        .map(|nibbles| nibbles / 2)
        .ok_or_else(|| anyhow!("{} frame dimensions overflow", format.name()))
}

/// Number of bytes in a packed RGB24 frame of the given size.
pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    frame_len(width, height, PixelFormat::Rgb24)
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(anyhow!(
            "{} frame has empty dimensions {}x{}",
            format.name(),
            width,
            height
        ));
    }
    if format == PixelFormat::Nv12 && (width % 2 != 0 || height % 2 != 0) {
        return Err(anyhow!(
            "NV12 frame dimensions must be even, got {}x{}",
            width,
            height
        ));
    }
    let expected = frame_len(width, height, format)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            format.name(),
            expected,
            pixels.len()
        ));
    }

    Ok(match format {
        PixelFormat::Rgb24 => pixels.to_vec(),
        PixelFormat::Rgba32 => pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelFormat::Gray8 => pixels.iter().flat_map(|&p| [p, p, p]).collect(),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width as usize),
    })
}

/// Expects a length-checked NV12 buffer: a full-resolution luma plane followed
/// by interleaved U/V samples, one pair per 2x2 block.
fn nv12_to_rgb(pixels: &[u8], width: usize) -> Vec<u8> {
    let (luma, chroma) = pixels.split_at(pixels.len() / 3 * 2);
    let mut rgb = Vec::with_capacity(luma.len() * 3);
    for (row, luma_row) in luma.chunks_exact(width).enumerate() {
        let chroma_row = &chroma[(row / 2) * width..][..width];
        for (pair, uv) in luma_row.chunks_exact(2).zip(chroma_row.chunks_exact(2)) {
            for &y in pair {
                rgb.extend_from_slice(&yuv_to_rgb(y, uv[0], uv[1]));
            }
        }
    }
    rgb
}

/// Full-range BT.601.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = f32::from(y);
    let (u, v) = (f32::from(u) - 128.0, f32::from(v) - 128.0);
    [
        clamp_to_u8(y + 1.402 * v),
        clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v),
        clamp_to_u8(y + 1.772 * u),
    ]
}

/// Nearest-neighbour resample of a packed RGB24 buffer.
pub(crate) fn resize_nearest(
    pixels: &[u8],
    width: u32,
    height: u32,
    new_width: u32,
    new_height: u32,
) -> Result<Vec<u8>> {
    if new_width == 0 || new_height == 0 {
        return Err(anyhow!(
            "cannot resize to empty dimensions {}x{}",
            new_width,
            new_height
        ));
    }
    let mut out = Vec::with_capacity(rgb_len(new_width, new_height)?);
    let (w, h) = (width as usize, height as usize);
    let (nw, nh) = (new_width as usize, new_height as usize);
    for y in 0..nh {
        let src_y = (y * h / nh).min(h - 1);
        for x in 0..nw {
            let src_x = (x * w / nw).min(w - 1);
            let idx = (src_y * w + src_x) * 3;
            out.extend_from_slice(&pixels[idx..idx + 3]);
        }
    }
    Ok(out)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
