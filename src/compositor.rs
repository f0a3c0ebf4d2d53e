//! Watermark Compositor
//!
//! Two stages:
//! - `prepare_watermark` turns the raw watermark source into the footprint
//!   used for a whole export job (contain-fit resize, transparent padding,
//!   rotation about its own center). Runs once per job.
//! - `watermark_photo` decodes one source photo, blends the prepared
//!   watermark at a top-left pixel offset and re-encodes as JPEG.
//!
//! All geometry is rounded to whole pixels before use. Output is always JPEG;
//! sources carrying alpha are flattened onto white first.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BULK_JPEG_QUALITY: u8 = 85;
pub const PREVIEW_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Failed to process image: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image of {width}x{height} exceeds the limit of {limit} pixels")]
    TooLarge { width: u32, height: u32, limit: u64 },
    #[error("Invalid watermark geometry: {0}")]
    InvalidGeometry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn to_pixels(self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn validate(&self) -> Result<(), CompositeError> {
        if !self.width.is_finite() || !self.height.is_finite() {
            return Err(CompositeError::InvalidGeometry(
                "width and height must be finite numbers".to_string(),
            ));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(CompositeError::InvalidGeometry(format!(
                "width and height must be greater than zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Whole-pixel footprint. Sub-pixel sizes round up to at least one pixel.
    pub fn to_pixels(self) -> (u32, u32) {
        let w = self.width.round().max(1.0).min(u32::MAX as f64) as u32;
        let h = self.height.round().max(1.0).min(u32::MAX as f64) as u32;
        (w, h)
    }

    /// Rejects footprints whose pixel area, or the area of their bounding box
    /// after rotating by `rotation` degrees, exceeds `max_pixels`.
    pub fn check_area(&self, rotation: f64, max_pixels: u64) -> Result<(), CompositeError> {
        self.validate()?;
        let (width, height) = self.to_pixels();
        let (rotated_w, rotated_h) =
            rotated_extent(f64::from(width), f64::from(height), normalize_rotation(rotation));

        let area = (f64::from(width) * f64::from(height)).max(rotated_w * rotated_h);
        if area > max_pixels as f64 {
            return Err(CompositeError::TooLarge {
                width,
                height,
                limit: max_pixels,
            });
        }
        Ok(())
    }
}

/// Bounding box of a `width`x`height` rectangle rotated by `degrees`, in whole pixels.
pub fn rotated_extent(width: f64, height: f64, degrees: f64) -> (f64, f64) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let w = (width * cos.abs() + height * sin.abs()).round().max(1.0);
    let h = (width * sin.abs() + height * cos.abs()).round().max(1.0);
    (w, h)
}

/// Placement of a watermark on every photo of an export job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkConfig {
    pub position: Position,
    pub dimensions: Dimensions,
    pub rotation: f64,
    pub watermark_source_url: String,
}

/// Rotation in degrees mapped into `[0, 360)`.
pub fn normalize_rotation(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Watermark pixels after resize and rotation, shared read-only by all photos of a job.
#[derive(Debug, Clone)]
pub struct PreparedWatermark {
    pub image: RgbaImage,
}

impl PreparedWatermark {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decodes an image after checking its header dimensions against `max_pixels`.
pub fn decode_bounded(bytes: &[u8], max_pixels: u64) -> Result<DynamicImage, CompositeError> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;

    if u64::from(width) * u64::from(height) > max_pixels {
        return Err(CompositeError::TooLarge {
            width,
            height,
            limit: max_pixels,
        });
    }

    Ok(ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?)
}

pub fn prepare_watermark(
    bytes: &[u8],
    config: &WatermarkConfig,
    max_pixels: u64,
) -> Result<PreparedWatermark, CompositeError> {
    config.dimensions.check_area(config.rotation, max_pixels)?;
    let source = decode_bounded(bytes, max_pixels)?;
    let (width, height) = config.dimensions.to_pixels();

    let fitted = contain_fit(&source, width, height);
    let rotated = rotate_about_center(&fitted, normalize_rotation(config.rotation));

    Ok(PreparedWatermark { image: rotated })
}

/// Fits `source` inside `width`x`height` without cropping or stretching,
/// centred on a fully transparent canvas of exactly that size.
pub fn contain_fit(source: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let resized = source.resize(width, height, FilterType::Lanczos3).to_rgba8();

    if resized.width() == width && resized.height() == height {
        return resized;
    }

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let offset_x = (width - resized.width().min(width)) / 2;
    let offset_y = (height - resized.height().min(height)) / 2;
    image::imageops::replace(
        &mut canvas,
        &resized,
        i64::from(offset_x),
        i64::from(offset_y),
    );
    canvas
}

/// Rotates clockwise by `degrees` around the image center. The canvas grows
/// to the rotated bounding box; uncovered area is transparent.
pub fn rotate_about_center(source: &RgbaImage, degrees: f64) -> RgbaImage {
    let degrees = normalize_rotation(degrees);
    if degrees == 0.0 {
        return source.clone();
    }
    if degrees == 90.0 {
        return image::imageops::rotate90(source);
    }
    if degrees == 180.0 {
        return image::imageops::rotate180(source);
    }
    if degrees == 270.0 {
        return image::imageops::rotate270(source);
    }

    let (src_w, src_h) = (source.width() as f64, source.height() as f64);
    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();

    let (out_w, out_h) = rotated_extent(src_w, src_h, degrees);
    let (out_w, out_h) = (out_w as u32, out_h as u32);
    let (half_out_w, half_out_h) = (out_w as f64 / 2.0, out_h as f64 / 2.0);
    let (half_src_w, half_src_h) = (src_w / 2.0, src_h / 2.0);

    let mut output = RgbaImage::from_pixel(out_w, out_h, Rgba([0, 0, 0, 0]));
    for (ox, oy, pixel) in output.enumerate_pixels_mut() {
        let dx = ox as f64 + 0.5 - half_out_w;
        let dy = oy as f64 + 0.5 - half_out_h;

        // Inverse of a clockwise rotation in y-down screen space
        let sx = dx * cos + dy * sin + half_src_w - 0.5;
        let sy = -dx * sin + dy * cos + half_src_h - 0.5;

        *pixel = sample_bilinear(source, sx, sy);
    }

    output
}

/// Bilinear sample in premultiplied space; outside the source is transparent.
fn sample_bilinear(source: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (width, height) = (source.width() as i64, source.height() as i64);
    if x <= -1.0 || y <= -1.0 || x >= width as f64 || y >= height as f64 {
        return Rgba([0, 0, 0, 0]);
    }

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let mut acc = [0.0f64; 4];
    for (dx, dy, weight) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        let (px, py) = (x0 + dx, y0 + dy);
        if weight == 0.0 || px < 0 || py < 0 || px >= width || py >= height {
            continue;
        }
        let Rgba([r, g, b, a]) = *source.get_pixel(px as u32, py as u32);
        let alpha = a as f64 / 255.0;
        acc[0] += r as f64 * alpha * weight;
        acc[1] += g as f64 * alpha * weight;
        acc[2] += b as f64 * alpha * weight;
        acc[3] += a as f64 * weight;
    }

    if acc[3] <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let alpha = acc[3] / 255.0;
    Rgba([
        (acc[0] / alpha).round().clamp(0.0, 255.0) as u8,
        (acc[1] / alpha).round().clamp(0.0, 255.0) as u8,
        (acc[2] / alpha).round().clamp(0.0, 255.0) as u8,
        acc[3].round().clamp(0.0, 255.0) as u8,
    ])
}

/// Drops alpha by blending onto white.
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut output = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in output.pixels_mut().zip(rgba.pixels()) {
        let alpha = src[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    output
}

/// Alpha-blends `watermark` over `base` with its top-left corner at (`x`, `y`).
/// Parts falling outside the base are clipped.
pub fn composite_onto(base: &mut RgbImage, watermark: &PreparedWatermark, x: i64, y: i64) {
    let (base_w, base_h) = (base.width() as i64, base.height() as i64);
    let wm = &watermark.image;

    let start_x = x.max(0);
    let start_y = y.max(0);
    let end_x = x.saturating_add(wm.width() as i64).min(base_w);
    let end_y = y.saturating_add(wm.height() as i64).min(base_h);

    for by in start_y..end_y {
        for bx in start_x..end_x {
            let Rgba([r, g, b, a]) = *wm.get_pixel((bx - x) as u32, (by - y) as u32);
            if a == 0 {
                continue;
            }
            let dst = base.get_pixel_mut(bx as u32, by as u32);
            if a == 255 {
                *dst = Rgb([r, g, b]);
                continue;
            }
            let alpha = a as u32;
            let blend =
                |s: u8, d: u8| ((s as u32 * alpha + d as u32 * (255 - alpha) + 127) / 255) as u8;
            *dst = Rgb([blend(r, dst[0]), blend(g, dst[1]), blend(b, dst[2])]);
        }
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CompositeError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode_image(image)?;
    Ok(buffer)
}

/// Full per-photo pipeline: decode, composite, encode.
pub fn watermark_photo(
    photo_bytes: &[u8],
    watermark: &PreparedWatermark,
    position: Position,
    quality: u8,
    max_pixels: u64,
) -> Result<Vec<u8>, CompositeError> {
    let photo = decode_bounded(photo_bytes, max_pixels)?;
    let mut canvas = flatten_onto_white(&photo);
    drop(photo);

    let (x, y) = position.to_pixels();
    composite_onto(&mut canvas, watermark, x, y);

    encode_jpeg(&canvas, quality)
}

#[cfg(test)]
pub(crate) mod test_images {
    use super::*;
    use image::ImageFormat;

    pub fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        encode_jpeg(&img, 95).unwrap()
    }
}
