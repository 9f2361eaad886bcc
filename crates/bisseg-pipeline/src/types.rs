//! Shared types for the bisseg segmentation pipeline.

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchKind;

/// A multi-band raster held in memory, pixel-interleaved.
///
/// Samples are stored row-major with the band axis innermost, so the
/// band vector of pixel `(row, col)` is the contiguous slice
/// `data[(row * cols + col) * bands..][..bands]`. Single-band imagery
/// still carries a band axis of length 1.
///
/// Deserialization goes through [`Raster::new`], so a serialized raster
/// with a zero dimension or a wrong sample count is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RasterParts")]
pub struct Raster {
    rows: usize,
    cols: usize,
    bands: usize,
    data: Vec<f64>,
}

impl Raster {
    /// Wrap pixel-interleaved samples as a raster.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Shape`] if any dimension is zero or if
    /// `data.len()` is not `rows * cols * bands`.
    pub fn new(rows: usize, cols: usize, bands: usize, data: Vec<f64>) -> Result<Self, SegmentError> {
        if rows == 0 || cols == 0 {
            return Err(SegmentError::Shape(format!(
                "raster has zero area ({rows}x{cols})"
            )));
        }
        if bands == 0 {
            return Err(SegmentError::Shape("raster has no bands".to_string()));
        }
        let expected = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(bands))
            .ok_or_else(|| SegmentError::Shape(format!("raster {rows}x{cols}x{bands} is too large")))?;
        if data.len() != expected {
            return Err(SegmentError::Shape(format!(
                "expected {expected} samples for {rows}x{cols}x{bands}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            rows,
            cols,
            bands,
            data,
        })
    }

    /// Build a raster by evaluating `f(row, col, band)` for every sample.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Shape`] if any dimension is zero.
    pub fn from_fn(
        rows: usize,
        cols: usize,
        bands: usize,
        mut f: impl FnMut(usize, usize, usize) -> f64,
    ) -> Result<Self, SegmentError> {
        let mut data = Vec::with_capacity(rows.saturating_mul(cols).saturating_mul(bands));
        for row in 0..rows {
            for col in 0..cols {
                for band in 0..bands {
                    data.push(f(row, col, band));
                }
            }
        }
        Self::new(rows, cols, bands, data)
    }

    /// Build a raster from nested `[row][col][band]` vectors.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Shape`] if the nesting is ragged (rows of
    /// different widths or pixels with different band counts) or empty.
    pub fn from_nested(nested: &[Vec<Vec<f64>>]) -> Result<Self, SegmentError> {
        let rows = nested.len();
        let cols = nested.first().map_or(0, Vec::len);
        let bands = nested
            .first()
            .and_then(|row| row.first())
            .map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows * cols * bands);
        for (r, row) in nested.iter().enumerate() {
            if row.len() != cols {
                return Err(SegmentError::Shape(format!(
                    "row {r} has {} columns, expected {cols}",
                    row.len()
                )));
            }
            for (c, pixel) in row.iter().enumerate() {
                if pixel.len() != bands {
                    return Err(SegmentError::Shape(format!(
                        "pixel ({r}, {c}) has {} bands, expected {bands}",
                        pixel.len()
                    )));
                }
                data.extend_from_slice(pixel);
            }
        }
        Self::new(rows, cols, bands, data)
    }

    /// Number of rows (image height).
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (image width).
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Number of bands per pixel.
    #[must_use]
    pub const fn bands(&self) -> usize {
        self.bands
    }

    /// Total pixel count (`rows * cols`).
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// All samples, pixel-interleaved.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Band vector of the pixel at `(row, col)`.
    #[must_use]
    pub fn pixel(&self, row: usize, col: usize) -> &[f64] {
        let start = (row * self.cols + col) * self.bands;
        &self.data[start..start + self.bands]
    }

    /// Band vector of the pixel at row-major index `index`.
    #[must_use]
    pub fn pixel_at(&self, index: usize) -> &[f64] {
        let start = index * self.bands;
        &self.data[start..start + self.bands]
    }

    /// Check that every sample is finite.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidData`] locating the first NaN or
    /// infinite sample in row-major, band-interleaved order.
    pub fn check_finite(&self) -> Result<(), SegmentError> {
        match self.data.iter().position(|v| !v.is_finite()) {
            None => Ok(()),
            Some(index) => {
                let pixel = index / self.bands;
                Err(SegmentError::InvalidData {
                    row: pixel / self.cols,
                    col: pixel % self.cols,
                    band: index % self.bands,
                    value: self.data[index],
                })
            }
        }
    }

    /// Copy rows `start..end` into a new raster.
    ///
    /// Callers guarantee `start <= end <= rows`.
    pub(crate) fn rows_slice(&self, start: usize, end: usize) -> Self {
        let stride = self.cols * self.bands;
        Self {
            rows: end - start,
            cols: self.cols,
            bands: self.bands,
            data: self.data[start * stride..end * stride].to_vec(),
        }
    }
}

#[derive(Deserialize)]
struct RasterParts {
    rows: usize,
    cols: usize,
    bands: usize,
    data: Vec<f64>,
}

impl TryFrom<RasterParts> for Raster {
    type Error = SegmentError;

    fn try_from(parts: RasterParts) -> Result<Self, Self::Error> {
        Self::new(parts.rows, parts.cols, parts.bands, parts.data)
    }
}

/// A 2D grid of region labels, one per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LabelGridParts")]
pub struct LabelGrid {
    rows: usize,
    cols: usize,
    labels: Vec<u32>,
}

impl LabelGrid {
    /// Wrap row-major labels as a grid.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Shape`] if `labels.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, labels: Vec<u32>) -> Result<Self, SegmentError> {
        if labels.len() != rows * cols {
            return Err(SegmentError::Shape(format!(
                "expected {} labels for {rows}x{cols}, got {}",
                rows * cols,
                labels.len()
            )));
        }
        Ok(Self { rows, cols, labels })
    }

    /// Wrap labels whose length the caller already guarantees.
    pub(crate) const fn from_raw(rows: usize, cols: usize, labels: Vec<u32>) -> Self {
        Self { rows, cols, labels }
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Label at `(row, col)`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.labels[row * self.cols + col]
    }

    /// One row of labels.
    #[must_use]
    pub fn row(&self, row: usize) -> &[u32] {
        &self.labels[row * self.cols..(row + 1) * self.cols]
    }

    /// All labels, row-major.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.labels
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u32] {
        &mut self.labels
    }

    /// Consumes the grid and returns the row-major labels.
    #[must_use]
    pub fn into_labels(self) -> Vec<u32> {
        self.labels
    }

    /// Largest label present.
    #[must_use]
    pub fn max_label(&self) -> u32 {
        self.labels.iter().copied().max().unwrap_or(0)
    }

    /// Number of distinct labels present.
    #[must_use]
    pub fn distinct_count(&self) -> usize {
        let mut seen: Vec<u32> = self.labels.clone();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

#[derive(Deserialize)]
struct LabelGridParts {
    rows: usize,
    cols: usize,
    labels: Vec<u32>,
}

impl TryFrom<LabelGridParts> for LabelGrid {
    type Error = SegmentError;

    fn try_from(parts: LabelGridParts) -> Result<Self, Self::Error> {
        Self::new(parts.rows, parts.cols, parts.labels)
    }
}

/// Configuration for a segmentation run.
///
/// # Thresholds
///
/// Thresholds are integer scale parameters. An adjacent pair of regions
/// is merged while its merge cost is strictly below `t²`, so larger
/// thresholds produce larger regions. Several thresholds may be given in
/// strictly ascending order; each produces one label grid and the
/// partitions nest (see [`crate::sweep`]).
///
/// # Tiling
///
/// With `tile` enabled the raster is split into strips of `tile_rows`
/// rows that are first merged independently up to `tile_threshold`,
/// then stitched and merged further. The first threshold must exceed
/// `tile_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Ascending scale thresholds, one output grid per entry.
    pub thresholds: Vec<u32>,

    /// Weight of the shape term against pure spectral merging, in `[0, 1]`.
    pub shape: f64,

    /// Balance between compactness and smoothness inside the shape term,
    /// in `[0, 1]`. `1.0` favours compact blobs, `0.0` smooth outlines.
    pub compactness: f64,

    /// Process the raster in horizontal strips.
    pub tile: bool,

    /// Threshold reached inside each strip before stitching.
    pub tile_threshold: u32,

    /// Rows per strip. Also the seam spacing used by nodata repair.
    pub tile_rows: usize,

    /// How strips are dispatched when tiling.
    pub dispatch: DispatchKind,

    /// Sentinel marking nodata pixels. A pixel is nodata when every one
    /// of its bands equals this value. Nodata pixels form label 0.
    pub nodata: Option<f64>,
}

impl SegmentConfig {
    /// Default single threshold.
    pub const DEFAULT_THRESHOLD: u32 = 10;
    /// Default shape weight.
    pub const DEFAULT_SHAPE: f64 = 0.5;
    /// Default compactness weight.
    pub const DEFAULT_COMPACTNESS: f64 = 0.5;
    /// Default per-strip threshold.
    pub const DEFAULT_TILE_THRESHOLD: u32 = 5;
    /// Default rows per strip.
    pub const DEFAULT_TILE_ROWS: usize = 1000;

    /// Check parameter ranges.
    ///
    /// Threshold ordering is checked separately by
    /// [`crate::sweep::validate_thresholds`] because its rules depend on
    /// whether tiling is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] for out-of-range weights,
    /// a zero strip height, a non-finite nodata sentinel, or an empty
    /// threshold list.
    pub fn validate(&self) -> Result<(), SegmentError> {
        if !(0.0..=1.0).contains(&self.shape) {
            return Err(SegmentError::InvalidConfig(format!(
                "shape must be within [0, 1], got {}",
                self.shape
            )));
        }
        if !(0.0..=1.0).contains(&self.compactness) {
            return Err(SegmentError::InvalidConfig(format!(
                "compactness must be within [0, 1], got {}",
                self.compactness
            )));
        }
        if self.tile_rows == 0 {
            return Err(SegmentError::InvalidConfig(
                "tile_rows must be at least 1".to_string(),
            ));
        }
        if let Some(value) = self.nodata
            && !value.is_finite()
        {
            return Err(SegmentError::InvalidConfig(format!(
                "nodata sentinel must be finite, got {value}"
            )));
        }
        if self.thresholds.is_empty() {
            return Err(SegmentError::InvalidConfig(
                "at least one threshold is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![Self::DEFAULT_THRESHOLD],
            shape: Self::DEFAULT_SHAPE,
            compactness: Self::DEFAULT_COMPACTNESS,
            tile: false,
            tile_threshold: Self::DEFAULT_TILE_THRESHOLD,
            tile_rows: Self::DEFAULT_TILE_ROWS,
            dispatch: DispatchKind::default(),
            nodata: None,
        }
    }
}

/// Errors that can occur during segmentation.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// The input raster or a label grid has an unusable shape.
    #[error("malformed raster: {0}")]
    Shape(String),

    /// A band sample is NaN or infinite.
    #[error("non-finite value {value} at row {row}, col {col}, band {band}")]
    InvalidData {
        /// Pixel row.
        row: usize,
        /// Pixel column.
        col: usize,
        /// Band index.
        band: usize,
        /// The offending sample.
        value: f64,
    },

    /// Thresholds are not ordered the way nesting or tiling requires.
    #[error("threshold order violated: {0}")]
    ThresholdOrder(String),

    /// A strip did not yield a usable frozen state.
    #[error("strip {strip} failed: {reason}")]
    TileProcessing {
        /// Index of the failing strip, top strip is 0.
        strip: usize,
        /// What went wrong.
        reason: String,
    },

    /// Configuration parameters are out of range.
    #[error("invalid segmentation configuration: {0}")]
    InvalidConfig(String),

    /// A region merge was requested on ids that cannot be merged.
    #[error("cannot merge region {absorb} into {keep}: {reason}")]
    InvalidMerge {
        /// Surviving region.
        keep: u32,
        /// Region that would be retired.
        absorb: u32,
        /// Which precondition failed.
        reason: &'static str,
    },
}
