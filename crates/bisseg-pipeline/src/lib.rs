//! bisseg-pipeline: Region-merging image segmentation (sans-IO).
//!
//! Partitions a multi-band raster into spatially connected regions by
//! repeatedly merging the cheapest adjacent pair:
//! region model -> merge engine -> (optional) strip tiling and
//! stitching -> threshold sweep -> nodata repair -> label grids.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory
//! [`Raster`] values and returns [`LabelGrid`]s. Reading and writing
//! image files lives in `bisseg-io`.

pub mod cost;
pub mod diagnostics;
pub mod dispatch;
pub mod freeze;
pub mod merge;
pub mod nodata;
pub mod output;
pub mod region;
pub mod stats;
pub mod sweep;
pub mod tile;
pub mod types;

pub use cost::MergeCriteria;
pub use dispatch::{DispatchKind, ParallelMap};
pub use freeze::{FrozenEdge, FrozenTileState};
pub use merge::Merger;
pub use region::{NODATA, RegionId, RegionModel, RegionStats};
pub use stats::{BandSummary, RegionSummary, region_statistics};
pub use sweep::{ThresholdSweep, validate_thresholds};
pub use types::{LabelGrid, Raster, SegmentConfig, SegmentError};

/// Segment `raster` once per threshold in `config.thresholds`.
///
/// Returns one label grid per threshold, in input order. Grids nest:
/// every region of a later grid is a union of regions of an earlier one.
///
/// # Pipeline steps
///
/// 1. Validate the configuration, threshold order and raster samples
/// 2. Build the region model, either over the whole raster or strip by
///    strip (merged to `tile_threshold`, then stitched)
/// 3. For each threshold: merge, snapshot, relabel densely, repair seams
///
/// # Errors
///
/// Returns [`SegmentError::InvalidConfig`] or
/// [`SegmentError::ThresholdOrder`] for bad parameters,
/// [`SegmentError::InvalidData`] for non-finite samples,
/// [`SegmentError::Shape`] for rasters too large for the id space, and
/// [`SegmentError::TileProcessing`] when a strip fails.
pub fn segment(
    raster: &Raster,
    config: &SegmentConfig,
) -> Result<Vec<LabelGrid>, SegmentError> {
    segment_iter(raster, config)?.collect()
}

/// Lazy form of [`segment`]: each grid is computed when requested.
///
/// Strips are dispatched through `config.dispatch`.
///
/// # Errors
///
/// Returns validation, initialization and strip errors up front; merge
/// errors surface from the iterator.
pub fn segment_iter(
    raster: &Raster,
    config: &SegmentConfig,
) -> Result<ThresholdSweep, SegmentError> {
    segment_iter_with(raster, config, &config.dispatch)
}

/// [`segment_iter`] with a caller-supplied executor for strip jobs.
///
/// # Errors
///
/// Same as [`segment_iter`].
pub fn segment_iter_with<P: ParallelMap>(
    raster: &Raster,
    config: &SegmentConfig,
    pool: &P,
) -> Result<ThresholdSweep, SegmentError> {
    validate(raster, config)?;
    let model = if config.tile {
        let tiles = tile::freeze_strips(raster, config, pool)?;
        tile::stitch(&tiles)?
    } else {
        RegionModel::initialize(raster, config.nodata)?
    };
    Ok(ThresholdSweep::new(model, config))
}

/// Everything checked before any merge or dispatch.
pub(crate) fn validate(raster: &Raster, config: &SegmentConfig) -> Result<(), SegmentError> {
    config.validate()?;
    validate_thresholds(
        &config.thresholds,
        config.tile.then_some(config.tile_threshold),
    )?;
    raster.check_finite()
}
