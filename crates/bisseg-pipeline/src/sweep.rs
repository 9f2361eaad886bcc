//! Threshold sweep: one merge run, one label grid per threshold.
//!
//! The sweep never resets the region model between thresholds. Merging
//! up to `t1` continues from the state reached at `t0`, so every region
//! at `t1` is a union of regions at `t0`. Grids are produced lazily, one
//! per call to [`Iterator::next`].

use crate::cost::MergeCriteria;
use crate::merge::Merger;
use crate::nodata;
use crate::output;
use crate::region::{NODATA, RegionModel};
use crate::types::{LabelGrid, SegmentConfig, SegmentError};

/// Check threshold ordering before any work starts.
///
/// `tile_threshold` is the per-strip threshold when tiling is enabled.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidConfig`] for an empty list, and
/// [`SegmentError::ThresholdOrder`] when the list is not strictly
/// ascending or when tiling is enabled and the first threshold does not
/// exceed the per-strip threshold.
pub fn validate_thresholds(
    thresholds: &[u32],
    tile_threshold: Option<u32>,
) -> Result<(), SegmentError> {
    let Some(&first) = thresholds.first() else {
        return Err(SegmentError::InvalidConfig(
            "at least one threshold is required".to_string(),
        ));
    };
    if let Some(pair) = thresholds.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(SegmentError::ThresholdOrder(format!(
            "thresholds must be strictly ascending, got {} followed by {}",
            pair[0], pair[1]
        )));
    }
    if let Some(xt) = tile_threshold
        && first <= xt
    {
        return Err(SegmentError::ThresholdOrder(format!(
            "first threshold {first} must exceed the tiling threshold {xt}"
        )));
    }
    Ok(())
}

/// Lazy iterator over the label grids of an ascending threshold list.
#[derive(Debug)]
pub struct ThresholdSweep {
    merger: Merger,
    thresholds: std::vec::IntoIter<u32>,
    nodata: bool,
    seam_spacing: usize,
}

impl ThresholdSweep {
    /// Sweep `config.thresholds` over an initialized (or stitched) model.
    ///
    /// Thresholds are assumed validated; see [`validate_thresholds`].
    #[must_use]
    pub fn new(model: RegionModel, config: &SegmentConfig) -> Self {
        let seam_spacing = if config.tile {
            config.tile_rows
        } else {
            model.rows()
        };
        Self {
            merger: Merger::new(model, MergeCriteria::from(config)),
            thresholds: config.thresholds.clone().into_iter(),
            nodata: config.nodata.is_some(),
            seam_spacing,
        }
    }

    /// The merge engine driving the sweep.
    #[must_use]
    pub const fn merger(&self) -> &Merger {
        &self.merger
    }

    /// Thresholds not yet produced.
    #[must_use]
    pub fn remaining(&self) -> &[u32] {
        self.thresholds.as_slice()
    }

    fn step(&mut self, threshold: u32) -> Result<LabelGrid, SegmentError> {
        self.merger.merge_below(threshold)?;
        let raw = self.merger.model().snapshot_labels();
        let mut grid = output::assemble(&raw, self.nodata);
        if self.nodata {
            let mask: Vec<bool> = raw.as_slice().iter().map(|&id| id == NODATA).collect();
            nodata::repair_seams(&mut grid, self.seam_spacing, Some(&mask));
        }
        log::info!(
            "threshold {threshold}: {} regions",
            self.merger.model().region_count()
        );
        Ok(grid)
    }
}

impl Iterator for ThresholdSweep {
    type Item = Result<LabelGrid, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        let threshold = self.thresholds.next()?;
        let result = self.step(threshold);
        if result.is_err() {
            // Fuse after the first error.
            self.thresholds = Vec::new().into_iter();
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.thresholds.size_hint()
    }
}

impl ExactSizeIterator for ThresholdSweep {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Raster;

    fn sweep(values: &[f64], rows: usize, cols: usize, config: &SegmentConfig) -> ThresholdSweep {
        let raster = Raster::new(rows, cols, 1, values.to_vec()).unwrap();
        let model = RegionModel::initialize(&raster, config.nodata).unwrap();
        ThresholdSweep::new(model, config)
    }

    #[test]
    fn validate_accepts_ascending_list() {
        assert!(validate_thresholds(&[5, 10, 20], None).is_ok());
        assert!(validate_thresholds(&[6], Some(5)).is_ok());
    }

    #[test]
    fn validate_rejects_empty_list() {
        assert!(matches!(
            validate_thresholds(&[], None),
            Err(SegmentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_non_ascending_lists() {
        for list in [&[10, 5][..], &[5, 5][..], &[1, 3, 2][..]] {
            assert!(matches!(
                validate_thresholds(list, None),
                Err(SegmentError::ThresholdOrder(_))
            ));
        }
    }

    #[test]
    fn validate_rejects_first_threshold_at_or_below_tiling_threshold() {
        let err = validate_thresholds(&[5, 10], Some(5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "threshold order violated: first threshold 5 must exceed the tiling threshold 5"
        );
    }

    #[test]
    fn produces_one_grid_per_threshold_in_order() {
        let values = [0.0, 0.0, 10.0, 10.0, 0.0, 0.0, 10.0, 10.0];
        let config = SegmentConfig {
            thresholds: vec![1, 15],
            shape: 0.0,
            ..SegmentConfig::default()
        };
        let mut grids = sweep(&values, 2, 4, &config);
        assert_eq!(grids.len(), 2);
        let fine = grids.next().unwrap().unwrap();
        assert_eq!(fine.as_slice(), &[0, 0, 1, 1, 0, 0, 1, 1]);
        let coarse = grids.next().unwrap().unwrap();
        assert_eq!(coarse.as_slice(), &[0; 8]);
        assert!(grids.next().is_none());
    }

    #[test]
    fn nodata_keeps_label_zero() {
        let values = [-1.0, 3.0, 3.0, -1.0, 3.0, 3.0];
        let config = SegmentConfig {
            thresholds: vec![1, 50],
            nodata: Some(-1.0),
            ..SegmentConfig::default()
        };
        for grid in sweep(&values, 2, 3, &config) {
            assert_eq!(grid.unwrap().as_slice(), &[0, 1, 1, 0, 1, 1]);
        }
    }
}
