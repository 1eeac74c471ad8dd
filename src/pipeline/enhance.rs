//! Page preprocessing: make a scan easier to read, then fit it under the
//! upload ceiling.
//!
//! Every step is a pure function from an image to a new image, so the chain
//! is trivially testable and safe to run on any thread:
//!
//! ```text
//! upscale_small ──▶ grayscale ──▶ contrast ──▶ sharpen ──▶ threshold ──▶ JPEG ladder
//!   (<1000 px ×2)    (8-bit L)     (×1.8)      (×2.0)     (140 → 0/255)  (85 → 30, −5)
//! ```
//!
//! Contrast and sharpness follow the classic "enhance by blending" model:
//! the image is interpolated away from a degenerate version of itself (its
//! mean grey for contrast, a 3×3 smoothed copy for sharpness) by `factor`.

use crate::config::EnhanceSettings;
use crate::error::PageError;
use crate::pipeline::render::Page;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// PIL's `SMOOTH` kernel; `filter3x3` divides by its sum (13).
const SMOOTH_KERNEL: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];

/// A page ready for upload.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub page_num: usize,
    pub path: PathBuf,
    pub jpeg: Vec<u8>,
    /// Quality the final encoding used.
    pub quality: u8,
    /// Number of encodes it took.
    pub encodes: usize,
}

/// JPEG bytes produced by [`encode_within_limit`].
#[derive(Debug, Clone)]
pub struct EncodedJpeg {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub encodes: usize,
}

impl EncodedJpeg {
    /// True when the ceiling was met (false means quality bottomed out).
    pub fn fits(&self, max_bytes: usize) -> bool {
        self.bytes.len() <= max_bytes
    }
}

/// Scratch file name for an enhanced page.
pub fn enhanced_file_name(stem: &str, page_num: usize) -> String {
    format!("{stem}_page_{page_num:04}.jpg")
}

/// Load, enhance and encode one page, writing the JPEG into `scratch`.
///
/// Blocking; the pipeline calls it from `spawn_blocking`.
pub fn prepare_page(
    page: &Page,
    settings: &EnhanceSettings,
    scratch: &Path,
) -> Result<PreparedImage, PageError> {
    let source = page.load()?;
    let enhanced = enhance(&source, settings);
    let encoded = encode_within_limit(&enhanced, settings).map_err(|detail| {
        PageError::EnhanceFailed {
            page: page.number,
            detail,
        }
    })?;

    if !encoded.fits(settings.max_bytes) {
        warn!(
            "Page {}: {} bytes still above the {} byte ceiling at quality {}",
            page.number,
            encoded.bytes.len(),
            settings.max_bytes,
            encoded.quality
        );
    }

    let path = scratch.join(enhanced_file_name(&page.source.stem(), page.number));
    std::fs::write(&path, &encoded.bytes).map_err(|e| PageError::EnhanceFailed {
        page: page.number,
        detail: format!("writing {}: {}", path.display(), e),
    })?;

    debug!(
        page = page.number,
        bytes = encoded.bytes.len(),
        quality = encoded.quality,
        encodes = encoded.encodes,
        "Prepared {}",
        path.display()
    );

    Ok(PreparedImage {
        page_num: page.number,
        path,
        jpeg: encoded.bytes,
        quality: encoded.quality,
        encodes: encoded.encodes,
    })
}

/// Run the full enhancement chain.
pub fn enhance(image: &DynamicImage, settings: &EnhanceSettings) -> GrayImage {
    let upscaled = upscale_small(image, settings.upscale_below);
    let gray = upscaled.to_luma8();
    let contrasted = adjust_contrast(&gray, settings.contrast);
    let sharpened = adjust_sharpness(&contrasted, settings.sharpness);
    threshold(&sharpened, settings.threshold)
}

/// Double both sides with Lanczos3 when the longest side is below `limit`.
pub fn upscale_small(image: &DynamicImage, limit: u32) -> DynamicImage {
    let longest = image.width().max(image.height());
    if longest >= limit {
        return image.clone();
    }
    debug!(
        "Upscaling {}x{} → {}x{}",
        image.width(),
        image.height(),
        image.width() * 2,
        image.height() * 2
    );
    image.resize_exact(image.width() * 2, image.height() * 2, FilterType::Lanczos3)
}

/// Blend every pixel away from the mean grey by `factor`.
pub fn adjust_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return image.clone();
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    let mean = (sum as f64 / pixels.len() as f64 + 0.5).floor() as f32;
    map_pixels(image, |p| blend(mean, p as f32, factor))
}

/// Blend every pixel away from its 3×3 smoothed value by `factor`.
///
/// Border pixels have no full neighbourhood and are kept unchanged.
pub fn adjust_sharpness(image: &GrayImage, factor: f32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return image.clone();
    }
    let smoothed = imageops::filter3x3(image, &SMOOTH_KERNEL);
    GrayImage::from_fn(w, h, |x, y| {
        let original = image.get_pixel(x, y).0[0];
        if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
            return image::Luma([original]);
        }
        let degenerate = smoothed.get_pixel(x, y).0[0] as f32;
        image::Luma([blend(degenerate, original as f32, factor)])
    })
}

/// `< level` → 0, `>= level` → 255, still 8-bit grayscale.
pub fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    map_pixels(image, |p| if p < level { 0 } else { 255 })
}

/// Encode at `start_quality`, stepping down until the ceiling or the floor.
///
/// Performs at most [`EnhanceSettings::max_encodes`] encodes.
pub fn encode_within_limit(
    image: &GrayImage,
    settings: &EnhanceSettings,
) -> Result<EncodedJpeg, String> {
    let floor = settings.min_quality.max(1);
    let step = settings.quality_step.max(1);
    let mut quality = settings.start_quality.clamp(floor, 100);
    let mut encodes = 0;

    loop {
        let bytes = encode_jpeg(image, quality)?;
        encodes += 1;
        if bytes.len() <= settings.max_bytes || quality <= floor {
            return Ok(EncodedJpeg {
                bytes,
                quality,
                encodes,
            });
        }
        debug!(
            "{} bytes above {} at quality {}, re-encoding",
            bytes.len(),
            settings.max_bytes,
            quality
        );
        quality = quality.saturating_sub(step).max(floor);
    }
}

/// Encode a grayscale image as JPEG at `quality` (1–100).
pub fn encode_jpeg(image: &GrayImage, quality: u8) -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|e| format!("JPEG encoding failed: {}", e))?;
    Ok(buffer)
}

/// `degenerate + factor * (original - degenerate)` in f32, truncated and clipped.
fn blend(degenerate: f32, original: f32, factor: f32) -> u8 {
    (degenerate + factor * (original - degenerate)).clamp(0.0, 255.0) as u8
}

fn map_pixels(image: &GrayImage, f: impl Fn(u8) -> u8) -> GrayImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = f(p.0[0]);
    }
    out
}
