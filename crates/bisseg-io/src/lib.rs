//! bisseg-io: file-system side of bisseg.
//!
//! Decodes image files into [`Raster`]s for the pure
//! `bisseg-pipeline` core, writes label grids back out as 16-bit
//! images, and names output files after the segmentation parameters.

pub mod labels;
pub mod naming;
pub mod raster;

use std::path::{Path, PathBuf};

use bisseg_pipeline::{Raster, SegmentConfig, SegmentError};

pub use labels::{Compression, encode_labels, write_labels};
pub use naming::{output_name, output_name_with, output_path};
pub use raster::{decode_raster, read_raster};

/// Errors from reading, segmenting or writing raster files.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Reading an input file failed.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Writing an output file failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Image decoding or encoding failed.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Segmentation failed.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// A label does not fit the 16-bit output sample type.
    #[error("label {label} does not fit in 16 bits")]
    LabelOverflow {
        /// The offending label.
        label: u32,
    },

    /// The output extension or raster shape has no supported encoding.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Segment an image file and write one label image per threshold.
///
/// Outputs are written next to `path` and named with
/// [`output_path`] (e.g. `image.tif_10_05_05.tif`). Returns the written
/// paths in threshold order.
///
/// # Errors
///
/// Returns [`IoError::Read`] or [`IoError::Image`] if the input cannot
/// be decoded, [`IoError::Segment`] if segmentation fails, and
/// [`IoError::Write`] or [`IoError::LabelOverflow`] if an output cannot
/// be written.
pub fn segment_file(
    path: &Path,
    config: &SegmentConfig,
    compression: Compression,
) -> Result<Vec<PathBuf>, IoError> {
    let raster = read_raster(path)?;
    log::info!(
        "{}: {}x{} pixels, {} bands",
        path.display(),
        raster.rows(),
        raster.cols(),
        raster.bands()
    );
    write_grids(path, &raster, config, compression)
}

fn write_grids(
    path: &Path,
    raster: &Raster,
    config: &SegmentConfig,
    compression: Compression,
) -> Result<Vec<PathBuf>, IoError> {
    let sweep = bisseg_pipeline::segment_iter(raster, config)?;
    let mut written = Vec::with_capacity(config.thresholds.len());
    for (&threshold, grid) in config.thresholds.iter().zip(sweep) {
        let grid = grid?;
        let out = output_path(path, threshold, config.shape, config.compactness);
        write_labels(&grid, &out, compression)?;
        log::info!(
            "threshold {threshold}: {} regions -> {}",
            grid.distinct_count(),
            out.display()
        );
        written.push(out);
    }
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn segment_file_writes_one_image_per_threshold() {
        let dir = std::env::temp_dir().join(format!("bisseg-io-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("stripes.png");
        let img =
            image::GrayImage::from_fn(6, 4, |x, _| image::Luma([if x < 3 { 10 } else { 200 }]));
        img.save(&input).unwrap();

        let config = SegmentConfig {
            thresholds: vec![2, 500],
            ..SegmentConfig::default()
        };
        let written = segment_file(&input, &config, Compression::Fast).unwrap();
        assert_eq!(
            written,
            vec![
                dir.join("stripes.png_2_05_05.tif"),
                dir.join("stripes.png_500_05_05.tif"),
            ]
        );

        let fine = image::open(&written[0]).unwrap().into_luma16();
        assert_eq!(fine.get_pixel(0, 0).0[0], 0);
        assert_eq!(fine.get_pixel(5, 3).0[0], 1);
        let coarse = image::open(&written[1]).unwrap().into_luma16();
        assert!(coarse.pixels().all(|p| p.0[0] == 0));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_input_is_a_read_error() {
        let err = segment_file(
            Path::new("/nonexistent/bisseg/input.png"),
            &SegmentConfig::default(),
            Compression::Default,
        )
        .unwrap_err();
        assert!(matches!(err, IoError::Read { .. }));
    }

    #[test]
    fn segmentation_errors_pass_through() {
        let err = IoError::from(SegmentError::ThresholdOrder("5 then 5".to_string()));
        assert_eq!(err.to_string(), "threshold order violated: 5 then 5");
    }
}
