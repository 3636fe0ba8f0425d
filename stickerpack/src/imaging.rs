//! Image operations used by the platform builders.
//!
//! Dimension math is kept in pure functions so the rounding policy can be
//! tested without decoding anything. Scaled dimensions use
//! round-half-to-even and never drop below one pixel:
//!
//! ```
//! use stickerpack::imaging::density_dimensions;
//!
//! assert_eq!(density_dimensions(640, 640, 320), (320, 320));
//! assert_eq!(density_dimensions(601, 599, 320), (300, 300));
//! ```
//!
//! Codec work is delegated to the `image` crate.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, ColorMap, FilterType};
use image::{DynamicImage, ImageEncoder, Rgba, RgbImage, RgbaImage};

use crate::error::{PipelineError, PipelineResult};

/// Reference width the density tiers are expressed against.
pub const DENSITY_BASELINE: u32 = 640;

/// JPEG quality for flattened previews.
pub const PREVIEW_JPEG_QUALITY: u8 = 90;

/// Round a scaled dimension: ties go to the even neighbour, minimum 1.
pub fn round_dimension(value: f64) -> u32 {
    value.round_ties_even().max(1.0) as u32
}

/// Dimensions after applying a direct multiplier.
pub fn scaled_dimensions(width: u32, height: u32, factor: f64) -> (u32, u32) {
    (
        round_dimension(width as f64 * factor),
        round_dimension(height as f64 * factor),
    )
}

/// Dimensions for a density tier of `tier_size` against the 640 baseline.
pub fn density_dimensions(width: u32, height: u32, tier_size: u32) -> (u32, u32) {
    let scale = |v: u32| round_dimension(v as f64 * tier_size as f64 / DENSITY_BASELINE as f64);
    (scale(width), scale(height))
}

/// Decode an in-memory source image.
pub fn decode(name: &str, data: &[u8]) -> PipelineResult<DynamicImage> {
    image::load_from_memory(data)
        .map_err(|e| PipelineError::image(format!("failed to decode '{}'", name)).with_source(e))
}

/// Resize to exact dimensions, skipping the filter when nothing changes.
pub fn resize(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    image.resize_exact(width, height, FilterType::Lanczos3)
}

/// Scale to cover `width`×`height` and crop the overflow around the centre.
pub fn crop_to_fill(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_to_fill(width, height, FilterType::Lanczos3)
}

/// Composite over an opaque white background.
pub fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &image.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

/// Colour map with `levels` evenly spaced values per colour channel.
///
/// Alpha passes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLevels {
    levels: u8,
}

impl ChannelLevels {
    pub fn new(levels: u8) -> Self {
        Self {
            levels: levels.max(2),
        }
    }

    fn steps(&self) -> u32 {
        self.levels as u32 - 1
    }

    fn level_of(&self, c: u8) -> u32 {
        (c as u32 * self.steps() + 127) / 255
    }

    fn value_of(&self, level: u32) -> u8 {
        ((level * 255 + self.steps() / 2) / self.steps()) as u8
    }
}

impl ColorMap for ChannelLevels {
    type Color = Rgba<u8>;

    fn index_of(&self, color: &Rgba<u8>) -> usize {
        let levels = self.levels as usize;
        let [r, g, b, _] = color.0;
        (self.level_of(r) as usize * levels + self.level_of(g) as usize) * levels
            + self.level_of(b) as usize
    }

    fn map_color(&self, color: &mut Rgba<u8>) {
        for channel in color.0.iter_mut().take(3) {
            *channel = self.value_of(self.level_of(*channel));
        }
    }
}

/// Reduce every colour channel to `levels` values with error diffusion.
///
/// Alpha is preserved.
pub fn posterize(image: &DynamicImage, levels: u8) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    imageops::dither(&mut rgba, &ChannelLevels::new(levels));
    rgba
}

fn create_output(path: &Path) -> PipelineResult<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            PipelineError::image(format!("failed to create {}", parent.display())).with_source(e)
        })?;
    }
    let file = File::create(path).map_err(|e| {
        PipelineError::image(format!("failed to create {}", path.display())).with_source(e)
    })?;
    Ok(BufWriter::new(file))
}

fn encode_failed(path: &Path, e: image::ImageError) -> PipelineError {
    PipelineError::image(format!("failed to encode {}", path.display())).with_source(e)
}

/// Write a PNG with default compression.
pub fn write_png(image: &DynamicImage, path: &Path) -> PipelineResult<()> {
    let writer = create_output(path)?;
    PngEncoder::new(writer)
        .write_image(image.as_bytes(), image.width(), image.height(), image.color().into())
        .map_err(|e| encode_failed(path, e))
}

/// Write a PNG with the strongest compression setting.
pub fn write_png_compact(image: &RgbaImage, path: &Path) -> PipelineResult<()> {
    let writer = create_output(path)?;
    PngEncoder::new_with_quality(writer, CompressionType::Best, PngFilter::Adaptive)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| encode_failed(path, e))
}

/// Write an opaque JPEG.
pub fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> PipelineResult<()> {
    let writer = create_output(path)?;
    JpegEncoder::new_with_quality(writer, quality)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| encode_failed(path, e))
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> PipelineResult<Vec<u8>> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(image.as_bytes(), image.width(), image.height(), image.color().into())
        .map_err(|e| PipelineError::image("failed to encode PNG").with_source(e))?;
    Ok(buffer)
}
