//! Tiled segmentation: split into strips, merge each, stitch them back.
//!
//! Strips are merged independently up to the per-strip threshold and
//! frozen into [`FrozenTileState`] values. Stitching rebuilds one
//! [`RegionModel`] over the whole raster from the frozen strips: global
//! ids are handed out bottom strip first, row coordinates are shifted
//! to the strip's real position, and regions facing each other across a
//! seam become adjacent with one shared edge per column where both
//! pixels are data.
//!
//! Perimeters need no correction. A strip counts its seam row edges as
//! border, which is exactly right while the region across the seam is a
//! different region, and a later merge across the seam subtracts the
//! shared length from both sides.

use crate::cost::MergeCriteria;
use crate::dispatch::ParallelMap;
use crate::freeze::FrozenTileState;
use crate::merge::Merger;
use crate::region::{NODATA, RegionId, RegionModel, RegionStats};
use crate::types::{Raster, SegmentConfig, SegmentError};

/// Split `raster` into horizontal strips of at most `rows` rows.
///
/// A single strip covers the whole raster when `rows` is at least its
/// height. `rows == 0` is treated as 1.
#[must_use]
pub fn split(raster: &Raster, rows: usize) -> Vec<Raster> {
    let step = rows.max(1);
    (0..raster.rows())
        .step_by(step)
        .map(|start| raster.rows_slice(start, (start + step).min(raster.rows())))
        .collect()
}

/// Initialize one strip, merge it up to the per-strip threshold and freeze it.
///
/// # Errors
///
/// Propagates initialization and merge errors for the strip.
pub fn freeze_strip(
    strip: &Raster,
    config: &SegmentConfig,
) -> Result<FrozenTileState, SegmentError> {
    let model = RegionModel::initialize(strip, config.nodata)?;
    let mut merger = Merger::new(model, MergeCriteria::from(config));
    merger.merge_below(config.tile_threshold)?;
    Ok(merger.into_model().freeze())
}

/// Freeze every strip of `raster` through `pool`, in strip order.
///
/// # Errors
///
/// Returns [`SegmentError::TileProcessing`] for the first strip (top to
/// bottom) whose job returned an error or panicked.
pub fn freeze_strips<P: ParallelMap>(
    raster: &Raster,
    config: &SegmentConfig,
    pool: &P,
) -> Result<Vec<FrozenTileState>, SegmentError> {
    let strips = split(raster, config.tile_rows);
    log::info!(
        "freezing {} strips of up to {} rows at threshold {}",
        strips.len(),
        config.tile_rows,
        config.tile_threshold
    );
    pool.map_ordered(strips, |strip| freeze_strip(&strip, config))
        .into_iter()
        .enumerate()
        .map(|(strip, outcome)| match outcome {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(err)) => Err(SegmentError::TileProcessing {
                strip,
                reason: err.to_string(),
            }),
            Err(message) => Err(SegmentError::TileProcessing {
                strip,
                reason: format!("worker failed: {message}"),
            }),
        })
        .collect()
}

/// Rebuild one region model from frozen strips given top to bottom.
///
/// # Errors
///
/// Returns [`SegmentError::TileProcessing`] naming the strip when a
/// frozen state is inconsistent or does not match the first strip's
/// width and band count, and [`SegmentError::Shape`] when there are no
/// strips or the stitched raster exceeds the region id space.
#[allow(clippy::cast_possible_truncation)]
pub fn stitch(tiles: &[FrozenTileState]) -> Result<RegionModel, SegmentError> {
    let Some(first) = tiles.first() else {
        return Err(SegmentError::Shape("no strips to stitch".to_string()));
    };
    let (cols, bands) = (first.cols, first.bands);
    for (strip, tile) in tiles.iter().enumerate() {
        let mismatch = if tile.cols != cols {
            Some(format!("{} columns, expected {cols}", tile.cols))
        } else if tile.bands != bands {
            Some(format!("{} bands, expected {bands}", tile.bands))
        } else {
            tile.validate().err().map(|err| err.to_string())
        };
        if let Some(reason) = mismatch {
            return Err(SegmentError::TileProcessing { strip, reason });
        }
    }

    let rows: usize = tiles.iter().map(|t| t.rows).sum();
    let pixel_count = rows * cols;
    if u32::try_from(pixel_count).map_or(true, |n| n >= NODATA) {
        return Err(SegmentError::Shape(format!(
            "{pixel_count} pixels exceed the region id space"
        )));
    }

    let mut row_start = Vec::with_capacity(tiles.len());
    let mut next_row = 0;
    for tile in tiles {
        row_start.push(next_row);
        next_row += tile.rows;
    }

    let mut id_offset = vec![0; tiles.len()];
    let mut stats: Vec<RegionStats> =
        Vec::with_capacity(tiles.iter().map(FrozenTileState::region_count).sum());
    for (strip, tile) in tiles.iter().enumerate().rev() {
        id_offset[strip] = stats.len() as RegionId;
        let shift = row_start[strip] as u32;
        stats.extend(tile.regions.iter().map(|region| RegionStats {
            bbox: region.bbox.shifted_down(shift),
            ..region.clone()
        }));
    }

    let pixel_region: Vec<RegionId> = tiles
        .iter()
        .zip(&id_offset)
        .flat_map(|(tile, &offset)| {
            tile.labels
                .iter()
                .map(move |&l| if l == NODATA { NODATA } else { l + offset })
        })
        .collect();

    let seams: Vec<(RegionId, RegionId)> = row_start
        .iter()
        .skip(1)
        .flat_map(|&top| {
            let above = &pixel_region[(top - 1) * cols..top * cols];
            let below = &pixel_region[top * cols..(top + 1) * cols];
            above.iter().copied().zip(below.iter().copied())
        })
        .collect();

    let mut model = RegionModel::from_parts(rows, cols, bands, pixel_region, stats);
    for (tile, &offset) in tiles.iter().zip(&id_offset) {
        for edge in &tile.edges {
            model.add_boundary(edge.a + offset, edge.b + offset, edge.shared);
        }
    }
    for (a, b) in seams {
        model.add_boundary(a, b, 1);
    }
    log::debug!(
        "stitched {} strips into {} regions",
        tiles.len(),
        model.region_count()
    );
    Ok(model)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchKind;

    fn gray(rows: usize, cols: usize, values: &[f64]) -> Raster {
        Raster::new(rows, cols, 1, values.to_vec()).unwrap()
    }

    fn config(tile_rows: usize, tile_threshold: u32) -> SegmentConfig {
        SegmentConfig {
            tile: true,
            tile_rows,
            tile_threshold,
            dispatch: DispatchKind::Sequential,
            ..SegmentConfig::default()
        }
    }

    #[test]
    fn split_covers_every_row_once() {
        let raster = Raster::from_fn(5, 2, 1, |r, c, _| (r * 2 + c) as f64).unwrap();
        let strips = split(&raster, 2);
        assert_eq!(strips.iter().map(Raster::rows).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(strips[2].data(), &[8.0, 9.0]);
        assert_eq!(split(&raster, 10).len(), 1);
    }

    #[test]
    fn freeze_strip_merges_to_tile_threshold() {
        let strip = gray(2, 2, &[3.0; 4]);
        let frozen = freeze_strip(&strip, &config(2, 1)).unwrap();
        assert_eq!(frozen.region_count(), 1);
        assert_eq!(frozen.labels, vec![0; 4]);
    }

    #[test]
    fn stitch_reconnects_seams_and_shifts_rows() {
        // Uniform 4x3 image in two strips of two rows.
        let raster = gray(4, 3, &[1.0; 12]);
        let cfg = config(2, 1);
        let tiles = freeze_strips(&raster, &cfg, &DispatchKind::Sequential).unwrap();
        assert_eq!(tiles.len(), 2);
        let model = stitch(&tiles).unwrap();
        assert_eq!(model.region_count(), 2);
        // Bottom strip is numbered first.
        let labels = model.snapshot_labels();
        assert_eq!(labels.get(0, 0), 1);
        assert_eq!(labels.get(3, 2), 0);
        let bottom = model.region(0).unwrap();
        assert_eq!(bottom.stats.bbox.min_row, 2);
        assert_eq!(bottom.stats.bbox.max_row, 3);
        assert_eq!(bottom.neighbors.get(&1), Some(&3));
        // Each 2x3 block keeps its own outline perimeter of 10.
        assert_eq!(bottom.stats.perimeter, 10);
    }

    #[test]
    fn stitched_merge_matches_untiled_merge() {
        let raster = gray(4, 3, &[1.0; 12]);
        let tiles = freeze_strips(&raster, &config(2, 1), &DispatchKind::Sequential).unwrap();
        let mut merger = Merger::new(stitch(&tiles).unwrap(), MergeCriteria::new(0.5, 0.5));
        merger.merge_below(2).unwrap();
        let region = merger.model().region(0).unwrap();
        assert_eq!(merger.model().region_count(), 1);
        assert_eq!(region.stats.perimeter, 14);
        assert_eq!(region.stats.pixel_count, 12);
    }

    #[test]
    fn seams_skip_nodata_pixels() {
        // Column 1 of the seam rows is nodata.
        let values = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let raster = gray(2, 3, &values);
        let cfg = SegmentConfig {
            nodata: Some(0.0),
            ..config(1, 0)
        };
        let tiles = freeze_strips(&raster, &cfg, &DispatchKind::Sequential).unwrap();
        let model = stitch(&tiles).unwrap();
        // Regions: bottom strip ids 0, 1; top strip ids 2, 3.
        assert_eq!(model.region_count(), 4);
        assert_eq!(model.neighbors(2).collect::<Vec<_>>(), vec![(0, 1)]);
        assert_eq!(model.neighbors(3).collect::<Vec<_>>(), vec![(1, 1)]);
    }

    #[test]
    fn stitch_rejects_mismatched_strips() {
        let a = freeze_strip(&gray(1, 2, &[1.0, 2.0]), &config(1, 0)).unwrap();
        let b = freeze_strip(&gray(1, 3, &[1.0, 2.0, 3.0]), &config(1, 0)).unwrap();
        assert!(matches!(
            stitch(&[a.clone(), b]),
            Err(SegmentError::TileProcessing { strip: 1, .. })
        ));
        let mut broken = a.clone();
        broken.labels.push(0);
        assert!(matches!(
            stitch(&[a, broken]),
            Err(SegmentError::TileProcessing { strip: 1, .. })
        ));
        assert!(matches!(stitch(&[]), Err(SegmentError::Shape(_))));
    }

    #[test]
    fn failing_strip_is_reported_by_index() {
        let mut values = vec![1.0; 6];
        values[4] = f64::NAN;
        let raster = gray(3, 2, &values);
        let err = freeze_strips(&raster, &config(1, 1), &DispatchKind::Sequential).unwrap_err();
        assert!(matches!(err, SegmentError::TileProcessing { strip: 2, .. }));
    }
}
