//! Per-region raster statistics over a finished label grid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{LabelGrid, Raster, SegmentError};

/// Summary of one band inside one region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandSummary {
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Mean sample.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
}

/// Summary of one labelled region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    /// Label in the grid.
    pub label: u32,
    /// Number of pixels carrying the label.
    pub pixel_count: u64,
    /// One summary per band.
    pub bands: Vec<BandSummary>,
}

struct Accumulator {
    count: u64,
    min: Vec<f64>,
    max: Vec<f64>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Accumulator {
    fn new(bands: usize) -> Self {
        Self {
            count: 0,
            min: vec![f64::INFINITY; bands],
            max: vec![f64::NEG_INFINITY; bands],
            sum: vec![0.0; bands],
            sum_sq: vec![0.0; bands],
        }
    }

    fn add(&mut self, pixel: &[f64]) {
        self.count += 1;
        for (band, &v) in pixel.iter().enumerate() {
            self.min[band] = self.min[band].min(v);
            self.max[band] = self.max[band].max(v);
            self.sum[band] += v;
            self.sum_sq[band] += v * v;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self, label: u32) -> RegionSummary {
        let n = self.count as f64;
        let bands = (0..self.sum.len())
            .map(|band| {
                let mean = self.sum[band] / n;
                let variance = (self.sum_sq[band] / n - mean * mean).max(0.0);
                BandSummary {
                    min: self.min[band],
                    max: self.max[band],
                    mean,
                    std: variance.sqrt(),
                }
            })
            .collect();
        RegionSummary {
            label,
            pixel_count: self.count,
            bands,
        }
    }
}

/// Compute count, min, max, mean and standard deviation per band for
/// every label present in `labels`, sorted by label.
///
/// # Errors
///
/// Returns [`SegmentError::Shape`] if the grid and raster dimensions differ.
pub fn region_statistics(
    raster: &Raster,
    labels: &LabelGrid,
) -> Result<Vec<RegionSummary>, SegmentError> {
    if (raster.rows(), raster.cols()) != (labels.rows(), labels.cols()) {
        return Err(SegmentError::Shape(format!(
            "label grid is {}x{} but the raster is {}x{}",
            labels.rows(),
            labels.cols(),
            raster.rows(),
            raster.cols()
        )));
    }
    let mut table: BTreeMap<u32, Accumulator> = BTreeMap::new();
    for (pixel, &label) in labels.as_slice().iter().enumerate() {
        table
            .entry(label)
            .or_insert_with(|| Accumulator::new(raster.bands()))
            .add(raster.pixel_at(pixel));
    }
    Ok(table
        .into_iter()
        .map(|(label, acc)| acc.finish(label))
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_each_label() {
        let raster = Raster::new(1, 3, 1, vec![10.0, 20.0, 21.0]).unwrap();
        let labels = LabelGrid::new(1, 3, vec![0, 1, 1]).unwrap();
        let stats = region_statistics(&raster, &labels).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].pixel_count, 1);
        assert!((stats[0].bands[0].max - 10.0).abs() < f64::EPSILON);
        let second = stats[1].bands[0];
        assert!((second.min - 20.0).abs() < f64::EPSILON);
        assert!((second.max - 21.0).abs() < f64::EPSILON);
        assert!((second.mean - 20.5).abs() < 1e-12);
        assert!((second.std - 0.5).abs() < 1e-12);
    }

    #[test]
    fn summarizes_every_band() {
        let raster = Raster::new(1, 2, 2, vec![10.0, 11.0, 20.0, 21.0]).unwrap();
        let labels = LabelGrid::new(1, 2, vec![0, 0]).unwrap();
        let stats = region_statistics(&raster, &labels).unwrap();
        assert_eq!(stats.len(), 1);
        assert!((stats[0].bands[0].min - 10.0).abs() < f64::EPSILON);
        assert!((stats[0].bands[1].max - 21.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let raster = Raster::new(2, 2, 1, vec![0.0; 4]).unwrap();
        let labels = LabelGrid::new(1, 4, vec![0; 4]).unwrap();
        assert!(matches!(
            region_statistics(&raster, &labels),
            Err(SegmentError::Shape(_))
        ));
    }
}
