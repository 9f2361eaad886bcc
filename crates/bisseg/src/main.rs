//! bisseg: segment an image file at one or more scale thresholds.
//!
//! Reads the image (every channel becomes a band), runs region-merging
//! segmentation, writes one 16-bit label image per threshold next to the
//! input and prints per-stage diagnostics. Useful for:
//!
//! - Producing nested segmentations for a list of thresholds
//! - Comparing tiled and untiled runs on large images
//! - Tuning the shape and compactness weights
//! - Timing each stage, averaged over `--runs` repetitions
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin bisseg -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use bisseg_io::Compression;
use bisseg_pipeline::diagnostics::{Clock, SegmentDiagnostics, StageMetrics};
use bisseg_pipeline::{DispatchKind, LabelGrid, Raster, SegmentConfig};
use clap::Parser;

/// Region-merging segmentation of multi-band images.
///
/// Segments the image at every threshold, writes the label images as
/// `<image>_<threshold>_<shape>_<compactness>.tif` and prints timing and
/// region-count diagnostics.
#[derive(Parser)]
#[command(name = "bisseg", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP, TIFF).
    image_path: PathBuf,

    /// Scale thresholds, strictly ascending (comma separated or repeated).
    #[arg(
        short,
        long = "threshold",
        value_delimiter = ',',
        num_args = 1..,
        default_values_t = vec![SegmentConfig::DEFAULT_THRESHOLD],
    )]
    thresholds: Vec<u32>,

    /// Weight of the shape term against spectral merging (0.0-1.0).
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_SHAPE)]
    shape: f64,

    /// Weight of compactness against smoothness inside the shape term (0.0-1.0).
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_COMPACTNESS)]
    compactness: f64,

    /// Split the image into horizontal strips merged independently first.
    #[arg(long)]
    tile: bool,

    /// Threshold each strip is merged to before stitching.
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_TILE_THRESHOLD)]
    tile_threshold: u32,

    /// Rows per strip when tiling.
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_TILE_ROWS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    tile_rows: usize,

    /// Process strips one after another on the main thread.
    #[arg(long, conflicts_with = "workers")]
    sequential: bool,

    /// Worker threads for strip processing (0 = one per core).
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Sample value marking pixels that belong to no region.
    #[arg(long, allow_negative_numbers = true)]
    nodata: Option<f64>,

    /// PNG compression effort for label images (fast, default, best).
    #[arg(long, default_value_t = Compression::Default)]
    compression: Compression,

    /// Skip writing label images.
    #[arg(long)]
    no_write: bool,

    /// Write per-region band statistics for every threshold as JSON.
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Number of runs, for averaging stage timings.
    ///
    /// Every run segments the same image with the same config and yields
    /// the same grids; label images and statistics are written once.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full segmentation config as a JSON string.
    ///
    /// When provided, all other segmentation parameter flags are ignored.
    /// The JSON must be a valid `SegmentConfig` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build a [`SegmentConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<SegmentConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(SegmentConfig {
        thresholds: cli.thresholds.clone(),
        shape: cli.shape,
        compactness: cli.compactness,
        tile: cli.tile,
        tile_threshold: cli.tile_threshold,
        tile_rows: cli.tile_rows,
        dispatch: if cli.sequential {
            DispatchKind::Sequential
        } else {
            DispatchKind::ThreadPool {
                workers: cli.workers,
            }
        },
        nodata: cli.nodata,
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let raster = match bisseg_io::read_raster(&cli.image_path) {
        Ok(raster) => raster,
        Err(e) => {
            eprintln!("Error loading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({}x{} pixels, {} bands)",
        cli.image_path.display(),
        raster.cols(),
        raster.rows(),
        raster.bands(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match bisseg_pipeline::diagnostics::segment_with_diagnostics(&raster, &config, &StdClock)
        {
            Ok((grids, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Outputs are identical across runs; write them once.
                if run == 0 {
                    if !cli.no_write
                        && let Err(msg) =
                            write_label_images(&cli.image_path, &grids, &config, cli.compression)
                    {
                        eprintln!("{msg}");
                        return ExitCode::FAILURE;
                    }
                    if let Some(ref stats_path) = cli.stats_json
                        && let Err(msg) = write_stats(stats_path, &raster, &grids, &config)
                    {
                        eprintln!("{msg}");
                        return ExitCode::FAILURE;
                    }
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Segmentation error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Write one label image per threshold next to `input`.
fn write_label_images(
    input: &Path,
    grids: &[LabelGrid],
    config: &SegmentConfig,
    compression: Compression,
) -> Result<(), String> {
    for (&threshold, grid) in config.thresholds.iter().zip(grids) {
        let out = bisseg_io::output_path(input, threshold, config.shape, config.compactness);
        bisseg_io::write_labels(grid, &out, compression)
            .map_err(|e| format!("Error writing {}: {e}", out.display()))?;
        eprintln!(
            "Labels written to {} ({} regions)",
            out.display(),
            grid.distinct_count(),
        );
    }
    Ok(())
}

/// Write `[{"threshold": t, "regions": [...]}, ...]` to `path`.
fn write_stats(
    path: &Path,
    raster: &Raster,
    grids: &[LabelGrid],
    config: &SegmentConfig,
) -> Result<(), String> {
    let mut entries = Vec::with_capacity(grids.len());
    for (&threshold, grid) in config.thresholds.iter().zip(grids) {
        let regions = bisseg_pipeline::region_statistics(raster, grid)
            .map_err(|e| format!("Error computing statistics: {e}"))?;
        let regions = serde_json::to_value(regions)
            .map_err(|e| format!("Error serializing statistics: {e}"))?;
        let mut entry = serde_json::Map::new();
        entry.insert("threshold".to_string(), threshold.into());
        entry.insert("regions".to_string(), regions);
        entries.push(serde_json::Value::Object(entry));
    }
    let json = serde_json::to_string_pretty(&entries)
        .map_err(|e| format!("Error serializing statistics: {e}"))?;
    std::fs::write(path, &json)
        .map_err(|e| format!("Error writing statistics to {}: {e}", path.display()))?;
    eprintln!(
        "Statistics written to {} ({} bytes)",
        path.display(),
        json.len()
    );
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&SegmentDiagnostics) -> Option<Duration>;

#[allow(clippy::cast_precision_loss)]
fn mean_ms(durations: impl Iterator<Item = Duration>) -> Option<f64> {
    let ms: Vec<f64> = durations.map(|d| d.as_secs_f64() * 1000.0).collect();
    (!ms.is_empty()).then(|| ms.iter().sum::<f64>() / ms.len() as f64)
}

/// Print min/mean/max total time and mean per-stage time across runs.
///
/// Timing only: the segmentation output does not depend on the run.
fn print_multi_run_summary(all_diagnostics: &[SegmentDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let Some(first) = all_diagnostics.first() else {
        println!("Warning: no diagnostics to summarize");
        return;
    };

    let durations = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0);
    let min = durations.clone().reduce(f64::min).unwrap_or(0.0);
    let max = durations.reduce(f64::max).unwrap_or(0.0);
    let mean = mean_ms(all_diagnostics.iter().map(|d| d.total_duration)).unwrap_or(0.0);

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Initialize", |d| d.initialize.as_ref().map(|s| s.duration)),
        ("Tile Freeze", |d| d.tiling.as_ref().map(|s| s.duration)),
        ("Stitch", |d| d.stitch.as_ref().map(|s| s.duration)),
    ];
    for (name, extractor) in stage_extractors {
        if let Some(stage_mean) = mean_ms(all_diagnostics.iter().filter_map(extractor)) {
            println!("{name:<24} {stage_mean:>10.3}ms");
        }
    }

    for (index, stage) in first.thresholds.iter().enumerate() {
        let StageMetrics::Threshold { threshold, .. } = stage.metrics else {
            continue;
        };
        let per_run = all_diagnostics
            .iter()
            .filter_map(|d| d.thresholds.get(index).map(|s| s.duration));
        if let Some(stage_mean) = mean_ms(per_run) {
            let name = format!("Threshold {threshold}");
            println!("{name:<24} {stage_mean:>10.3}ms");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_a_config() {
        let cli = Cli::parse_from([
            "bisseg",
            "scene.png",
            "-t",
            "5,20",
            "--tile",
            "--tile-threshold",
            "3",
            "--sequential",
            "--nodata",
            "-1",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.thresholds, vec![5, 20]);
        assert!(config.tile);
        assert_eq!(config.tile_threshold, 3);
        assert_eq!(config.dispatch, DispatchKind::Sequential);
        assert_eq!(config.nodata, Some(-1.0));
    }

    #[test]
    fn defaults_match_the_pipeline() {
        let cli = Cli::parse_from(["bisseg", "scene.png"]);
        assert_eq!(config_from_cli(&cli).unwrap(), SegmentConfig::default());
        assert_eq!(cli.compression, Compression::Default);
    }

    #[test]
    fn runs_only_average_timings() {
        assert!(Cli::try_parse_from(["bisseg", "x", "--runs", "0"]).is_err());
        let cli = Cli::parse_from(["bisseg", "x", "--runs", "3"]);
        assert_eq!(cli.runs, 3);
        assert_eq!(config_from_cli(&cli).unwrap(), SegmentConfig::default());
        let mean = mean_ms([Duration::from_millis(2), Duration::from_millis(4)].into_iter());
        assert!((mean.unwrap() - 3.0).abs() < 1e-9);
        assert!(mean_ms(std::iter::empty()).is_none());
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::parse_from([
            "bisseg",
            "scene.png",
            "--shape",
            "0.1",
            "--config-json",
            r#"{"thresholds": [7], "shape": 0.9}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.thresholds, vec![7]);
        assert!((config.shape - 0.9).abs() < f64::EPSILON);
        assert!(config_from_cli(&Cli::parse_from(["bisseg", "x", "--config-json", "{"])).is_err());
    }
}
