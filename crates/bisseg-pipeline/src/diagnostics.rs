//! Segmentation diagnostics: timing and counts for each stage.
//!
//! [`segment_with_diagnostics`] runs the same stages as
//! [`segment`](crate::segment) and records how long each took along
//! with stage-specific counts. Time is read through the [`Clock`] trait
//! so the core never touches a platform clock itself.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::freeze::FrozenTileState;
use crate::region::RegionModel;
use crate::sweep::ThresholdSweep;
use crate::tile;
use crate::types::{LabelGrid, Raster, SegmentConfig, SegmentError};

/// Source of monotonic time for stage measurements.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single segmentation run.
///
/// An untiled run fills `initialize`; a tiled run fills `tiling` and
/// `stitch` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDiagnostics {
    /// Whole-raster model construction (untiled runs).
    pub initialize: Option<StageDiagnostics>,
    /// Per-strip merge and freeze (tiled runs).
    pub tiling: Option<StageDiagnostics>,
    /// Stitching frozen strips into one model (tiled runs).
    pub stitch: Option<StageDiagnostics>,
    /// One entry per threshold, in sweep order.
    pub thresholds: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts for the run.
    pub summary: SegmentSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// One region per pixel.
    Initialize {
        /// Regions created.
        region_count: usize,
        /// Pixels skipped as nodata.
        nodata_pixels: usize,
    },
    /// Independent strip merging.
    Tiling {
        /// Number of strips.
        strip_count: usize,
        /// Rows per strip.
        tile_rows: usize,
        /// Threshold each strip was merged to.
        tile_threshold: u32,
        /// Regions across all frozen strips.
        region_count: usize,
    },
    /// Seam reconnection.
    Stitch {
        /// Regions in the stitched model.
        region_count: usize,
        /// Pixels skipped as nodata.
        nodata_pixels: usize,
    },
    /// Merging up to one threshold and producing its grid.
    Threshold {
        /// The threshold.
        threshold: u32,
        /// Merges performed for this threshold.
        merges: usize,
        /// Regions left afterwards.
        region_count: usize,
    },
}

/// High-level summary counts for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSummary {
    /// Raster rows.
    pub rows: usize,
    /// Raster columns.
    pub cols: usize,
    /// Bands per pixel.
    pub bands: usize,
    /// Total pixel count.
    pub pixel_count: usize,
    /// Whether the raster was processed in strips.
    pub tiled: bool,
    /// Regions left after the last threshold.
    pub final_region_count: usize,
    /// Merges performed over the whole sweep.
    pub total_merges: usize,
}

impl SegmentDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Segmentation Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Raster: {}x{}x{} ({} pixels){}",
            self.summary.rows,
            self.summary.cols,
            self.summary.bands,
            self.summary.pixel_count,
            if self.summary.tiled { ", tiled" } else { "" },
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages: Vec<(String, &StageDiagnostics)> = Vec::new();
        if let Some(ref init) = self.initialize {
            stages.push(("Initialize".to_string(), init));
        }
        if let Some(ref tiling) = self.tiling {
            stages.push(("Tiling".to_string(), tiling));
        }
        if let Some(ref stitch) = self.stitch {
            stages.push(("Stitch".to_string(), stitch));
        }
        for diag in &self.thresholds {
            let name = match diag.metrics {
                StageMetrics::Threshold { threshold, .. } => format!("Threshold {threshold}"),
                _ => "Threshold".to_string(),
            };
            stages.push((name, diag));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Merges: {}  |  Final regions: {}",
            self.summary.total_merges, self.summary.final_region_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Initialize {
            region_count,
            nodata_pixels,
        } => format!("{region_count} regions, {nodata_pixels} nodata"),
        StageMetrics::Tiling {
            strip_count,
            tile_rows,
            tile_threshold,
            region_count,
        } => format!(
            "{strip_count} strips x {tile_rows} rows, xt={tile_threshold} -> {region_count} regions"
        ),
        StageMetrics::Stitch {
            region_count,
            nodata_pixels,
        } => format!("{region_count} regions, {nodata_pixels} nodata"),
        StageMetrics::Threshold {
            merges,
            region_count,
            ..
        } => format!("{merges} merges -> {region_count} regions"),
    }
}

/// Segment `raster` and record per-stage diagnostics.
///
/// Produces the same grids as [`segment`](crate::segment), dispatching
/// strips through `config.dispatch`.
///
/// # Errors
///
/// Returns the same errors as [`segment`](crate::segment).
pub fn segment_with_diagnostics<C: Clock>(
    raster: &Raster,
    config: &SegmentConfig,
    clock: &C,
) -> Result<(Vec<LabelGrid>, SegmentDiagnostics), SegmentError> {
    let total_start = clock.now();
    crate::validate(raster, config)?;

    let (model, initialize, tiling, stitch) = if config.tile {
        let start = clock.now();
        let tiles = tile::freeze_strips(raster, config, &config.dispatch)?;
        let tiling = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Tiling {
                strip_count: tiles.len(),
                tile_rows: config.tile_rows,
                tile_threshold: config.tile_threshold,
                region_count: tiles.iter().map(FrozenTileState::region_count).sum(),
            },
        };

        let start = clock.now();
        let model = tile::stitch(&tiles)?;
        let stitch = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Stitch {
                region_count: model.region_count(),
                nodata_pixels: model.nodata_pixels(),
            },
        };
        (model, None, Some(tiling), Some(stitch))
    } else {
        let start = clock.now();
        let model = RegionModel::initialize(raster, config.nodata)?;
        let initialize = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Initialize {
                region_count: model.region_count(),
                nodata_pixels: model.nodata_pixels(),
            },
        };
        (model, Some(initialize), None, None)
    };

    let mut sweep = ThresholdSweep::new(model, config);
    let mut grids = Vec::with_capacity(config.thresholds.len());
    let mut thresholds = Vec::with_capacity(config.thresholds.len());
    for &threshold in &config.thresholds {
        let start = clock.now();
        let before = sweep.merger().merges();
        let Some(grid) = sweep.next() else {
            break;
        };
        grids.push(grid?);
        thresholds.push(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Threshold {
                threshold,
                merges: sweep.merger().merges() - before,
                region_count: sweep.merger().model().region_count(),
            },
        });
    }

    let diagnostics = SegmentDiagnostics {
        initialize,
        tiling,
        stitch,
        thresholds,
        total_duration: clock.elapsed(&total_start),
        summary: SegmentSummary {
            rows: raster.rows(),
            cols: raster.cols(),
            bands: raster.bands(),
            pixel_count: raster.pixel_count(),
            tiled: config.tile,
            final_region_count: sweep.merger().model().region_count(),
            total_merges: sweep.merger().merges(),
        },
    };
    Ok((grids, diagnostics))
}
