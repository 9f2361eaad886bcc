//! Image decoding into multi-band rasters.
//!
//! Every channel of the decoded image becomes a band, alpha included,
//! so a grayscale file yields a one-band raster rather than a 2D one.
//! Samples keep their native scale (0-255 for 8-bit, 0-65535 for
//! 16-bit, unscaled for float images) because merge thresholds are
//! expressed in sample units.

use std::path::Path;

use bisseg_pipeline::Raster;
use image::DynamicImage;

use crate::IoError;

/// Decode image bytes (PNG, JPEG, BMP, WebP, TIFF) into a raster.
///
/// # Errors
///
/// Returns [`IoError::Image`] if the bytes are not a decodable image,
/// and [`IoError::Segment`] if the decoded image has zero area.
pub fn decode_raster(bytes: &[u8]) -> Result<Raster, IoError> {
    let img = image::load_from_memory(bytes)?;
    to_raster(img)
}

/// Read and decode an image file.
///
/// # Errors
///
/// Returns [`IoError::Read`] if the file cannot be read, otherwise the
/// errors of [`decode_raster`].
pub fn read_raster(path: &Path) -> Result<Raster, IoError> {
    let bytes = std::fs::read(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_raster(&bytes)
}

fn widen<T: Copy + Into<f64>>(samples: &[T]) -> Vec<f64> {
    samples.iter().map(|&v| v.into()).collect()
}

fn to_raster(img: DynamicImage) -> Result<Raster, IoError> {
    let rows = img.height() as usize;
    let cols = img.width() as usize;
    let (bands, data) = match img {
        DynamicImage::ImageLuma8(buf) => (1, widen(buf.as_raw())),
        DynamicImage::ImageLumaA8(buf) => (2, widen(buf.as_raw())),
        DynamicImage::ImageRgb8(buf) => (3, widen(buf.as_raw())),
        DynamicImage::ImageRgba8(buf) => (4, widen(buf.as_raw())),
        DynamicImage::ImageLuma16(buf) => (1, widen(buf.as_raw())),
        DynamicImage::ImageLumaA16(buf) => (2, widen(buf.as_raw())),
        DynamicImage::ImageRgb16(buf) => (3, widen(buf.as_raw())),
        DynamicImage::ImageRgba16(buf) => (4, widen(buf.as_raw())),
        DynamicImage::ImageRgb32F(buf) => (3, widen(buf.as_raw())),
        DynamicImage::ImageRgba32F(buf) => (4, widen(buf.as_raw())),
        other => {
            log::warn!(
                "unrecognized color type {:?}, decoding as 16-bit RGBA",
                other.color()
            );
            (4, widen(other.to_rgba16().as_raw()))
        }
    };
    Ok(Raster::new(rows, cols, bands, data)?)
}
