//! Label grid output as 16-bit grayscale images.
//!
//! Labels are stored as unsigned 16-bit samples, the widest integer
//! grayscale type both the PNG and TIFF encoders accept. A grid whose
//! largest label exceeds `u16::MAX` is rejected rather than truncated.

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

use bisseg_pipeline::LabelGrid;
use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::tiff::TiffEncoder;

use crate::IoError;

/// Output compression effort.
///
/// Applies to PNG output; TIFF output is written uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Fastest encoding, larger files.
    Fast,
    /// Balanced encoding.
    #[default]
    Default,
    /// Smallest files, slowest encoding.
    Best,
}

impl Compression {
    const fn png(self) -> CompressionType {
        match self {
            Self::Fast => CompressionType::Fast,
            Self::Default => CompressionType::Default,
            Self::Best => CompressionType::Best,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Default => "default",
            Self::Best => "best",
        })
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "default" => Ok(Self::Default),
            "best" => Ok(Self::Best),
            other => Err(format!(
                "unknown compression {other:?}, expected fast, default or best"
            )),
        }
    }
}

/// Output container chosen from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Png,
    Tiff,
}

impl Container {
    fn from_path(path: &Path) -> Result<Self, IoError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => Ok(Self::Png),
            Some("tif" | "tiff") => Ok(Self::Tiff),
            _ => Err(IoError::UnsupportedFormat(format!(
                "cannot write labels to {}, use .png, .tif or .tiff",
                path.display()
            ))),
        }
    }
}

/// Native-endian 16-bit sample bytes of `grid`, plus its dimensions.
fn sample_bytes(grid: &LabelGrid) -> Result<(Vec<u8>, u32, u32), IoError> {
    let width = u32::try_from(grid.cols())
        .map_err(|_| IoError::UnsupportedFormat(format!("{} columns", grid.cols())))?;
    let height = u32::try_from(grid.rows())
        .map_err(|_| IoError::UnsupportedFormat(format!("{} rows", grid.rows())))?;
    let mut bytes = Vec::with_capacity(grid.as_slice().len() * 2);
    for &label in grid.as_slice() {
        let sample = u16::try_from(label).map_err(|_| IoError::LabelOverflow { label })?;
        bytes.extend_from_slice(&sample.to_ne_bytes());
    }
    Ok((bytes, width, height))
}

fn encode(
    grid: &LabelGrid,
    container: Container,
    compression: Compression,
) -> Result<Vec<u8>, IoError> {
    let (bytes, width, height) = sample_bytes(grid)?;
    let mut out = Cursor::new(Vec::new());
    match container {
        Container::Png => {
            PngEncoder::new_with_quality(&mut out, compression.png(), FilterType::Adaptive)
                .write_image(&bytes, width, height, image::ExtendedColorType::L16)?;
        }
        Container::Tiff => {
            TiffEncoder::new(&mut out).write_image(
                &bytes,
                width,
                height,
                image::ExtendedColorType::L16,
            )?;
        }
    }
    Ok(out.into_inner())
}

/// Encode `grid` as a 16-bit grayscale PNG.
///
/// # Errors
///
/// Returns [`IoError::LabelOverflow`] if a label exceeds `u16::MAX`, and
/// [`IoError::Image`] if encoding fails.
pub fn encode_labels(grid: &LabelGrid, compression: Compression) -> Result<Vec<u8>, IoError> {
    encode(grid, Container::Png, compression)
}

/// Write `grid` to `path` as PNG or TIFF depending on the extension.
///
/// # Errors
///
/// Returns [`IoError::UnsupportedFormat`] for other extensions,
/// [`IoError::LabelOverflow`] if a label exceeds `u16::MAX`, and
/// [`IoError::Write`] if the file cannot be written.
pub fn write_labels(
    grid: &LabelGrid,
    path: &Path,
    compression: Compression,
) -> Result<(), IoError> {
    let container = Container::from_path(path)?;
    let bytes = encode(grid, container, compression)?;
    std::fs::write(path, bytes).map_err(|source| IoError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn grid(labels: Vec<u32>) -> LabelGrid {
        LabelGrid::new(2, 2, labels).unwrap()
    }

    #[test]
    fn png_round_trips_labels() {
        let bytes = encode_labels(&grid(vec![0, 1, 2, 65_535]), Compression::Best).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().into_luma16();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.as_raw(), &[0, 1, 2, 65_535]);
    }

    #[test]
    fn tiff_container_is_decodable() {
        let labels = grid(vec![3, 3, 4, 4]);
        let bytes = encode(&labels, Container::Tiff, Compression::Default).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().into_luma16();
        assert_eq!(decoded.as_raw(), &[3, 3, 4, 4]);
    }

    #[test]
    fn labels_above_sixteen_bits_are_rejected() {
        let err = encode_labels(&grid(vec![0, 1, 2, 70_000]), Compression::Fast).unwrap_err();
        assert!(matches!(err, IoError::LabelOverflow { label: 70_000 }));
    }

    #[test]
    fn container_follows_extension() {
        assert_eq!(Container::from_path(Path::new("a.TIF")).unwrap(), Container::Tiff);
        assert_eq!(Container::from_path(Path::new("a.png")).unwrap(), Container::Png);
        assert!(matches!(
            Container::from_path(Path::new("a.jpg")),
            Err(IoError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn compression_parses_case_insensitively() {
        assert_eq!("BEST".parse::<Compression>().unwrap(), Compression::Best);
        assert_eq!(Compression::Fast.to_string(), "fast");
        assert!("lzw".parse::<Compression>().is_err());
    }
}
