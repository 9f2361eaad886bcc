//! Merge cost of two adjacent regions.
//!
//! The spectral part is the exact increase in within-region squared
//! error caused by the merge (Ward's criterion), averaged over bands:
//!
//! ```text
//! spectral = nA·nB / (nA + nB) · mean_b (μA,b − μB,b)²
//! ```
//!
//! The `nA·nB / (nA + nB)` factor grows with the smaller region, so a
//! small region is absorbed into a large one far more readily than two
//! large, different regions are fused.
//!
//! The shape part is a multiplier on the spectral cost built from the
//! merged region's outline: compactness `P / (4·√n)` and smoothness
//! `P / P_bbox`. Both ratios are 1 for a square and grow for ragged or
//! elongated outlines, so shape only ever slows down a merge the spectra
//! already justify. Spectrally identical regions always cost zero.

use serde::{Deserialize, Serialize};

use crate::region::RegionStats;
use crate::types::SegmentConfig;

/// Weights of the cost terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeCriteria {
    /// Shape weight in `[0, 1]`; 0 is pure spectral merging.
    pub shape: f64,
    /// Compactness share of the shape term in `[0, 1]`.
    pub compactness: f64,
}

impl MergeCriteria {
    /// Create criteria from the two weights.
    #[must_use]
    pub const fn new(shape: f64, compactness: f64) -> Self {
        Self { shape, compactness }
    }

    /// Cost of merging regions `a` and `b`, which share `shared` edges.
    ///
    /// Sums that overflow `f64` give an infinite cost, so the pair never
    /// merges.
    #[must_use]
    pub fn cost(&self, a: &RegionStats, b: &RegionStats, shared: u32) -> f64 {
        let cost = self.weighted_cost(a, b, shared);
        if cost.is_finite() { cost } else { f64::INFINITY }
    }

    fn weighted_cost(&self, a: &RegionStats, b: &RegionStats, shared: u32) -> f64 {
        let spectral = spectral_cost(a, b);
        if self.shape <= 0.0 || spectral <= 0.0 {
            return spectral;
        }
        let shape = self.compactness.mul_add(
            compactness_ratio(a, b, shared),
            (1.0 - self.compactness) * smoothness_ratio(a, b, shared),
        );
        spectral * self.shape.mul_add(shape, 1.0 - self.shape)
    }
}

impl From<&SegmentConfig> for MergeCriteria {
    fn from(config: &SegmentConfig) -> Self {
        Self::new(config.shape, config.compactness)
    }
}

/// Ward merge cost averaged over bands.
#[allow(clippy::cast_precision_loss)]
fn spectral_cost(a: &RegionStats, b: &RegionStats) -> f64 {
    let (na, nb) = (a.pixel_count as f64, b.pixel_count as f64);
    let bands = a.bands();
    if bands == 0 {
        return 0.0;
    }
    let squared: f64 = (0..bands)
        .map(|band| {
            let d = a.mean(band) - b.mean(band);
            d * d
        })
        .sum();
    na * nb / (na + nb) * squared / bands as f64
}

fn merged_perimeter(a: &RegionStats, b: &RegionStats, shared: u32) -> u64 {
    (a.perimeter + b.perimeter).saturating_sub(2 * u64::from(shared))
}

#[allow(clippy::cast_precision_loss)]
fn compactness_ratio(a: &RegionStats, b: &RegionStats, shared: u32) -> f64 {
    let n = (a.pixel_count + b.pixel_count) as f64;
    merged_perimeter(a, b, shared) as f64 / (4.0 * n.sqrt())
}

#[allow(clippy::cast_precision_loss)]
fn smoothness_ratio(a: &RegionStats, b: &RegionStats, shared: u32) -> f64 {
    let bbox = a.bbox.union(b.bbox);
    merged_perimeter(a, b, shared) as f64 / bbox.perimeter() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(value: f64, row: u32, col: u32) -> RegionStats {
        RegionStats::from_pixel(&[value], row, col)
    }

    #[test]
    fn identical_regions_cost_zero() {
        let criteria = MergeCriteria::new(0.5, 0.5);
        let cost = criteria.cost(&pixel(7.0, 0, 0), &pixel(7.0, 0, 1), 1);
        assert!(cost.abs() < f64::EPSILON);
    }

    #[test]
    fn pure_spectral_is_ward_criterion() {
        let criteria = MergeCriteria::new(0.0, 0.5);
        // Two pixels 4 apart: 1*1/2 * 16.
        let cost = criteria.cost(&pixel(0.0, 0, 0), &pixel(4.0, 0, 1), 1);
        assert!((cost - 8.0).abs() < 1e-12);
    }

    #[test]
    fn overflowing_sums_never_merge() {
        let mut a = pixel(1e308, 0, 0);
        a.absorb(&pixel(1e308, 0, 1), 1);
        let mut b = pixel(1e308, 1, 0);
        b.absorb(&pixel(1e308, 1, 1), 1);
        assert!(a.sum[0].is_infinite());
        for criteria in [MergeCriteria::new(0.0, 0.5), MergeCriteria::new(0.5, 0.5)] {
            let cost = criteria.cost(&a, &b, 2);
            assert!(cost.is_infinite() && cost > 0.0);
        }
    }

    #[test]
    fn spectral_cost_averages_bands() {
        let a = RegionStats::from_pixel(&[0.0, 0.0], 0, 0);
        let b = RegionStats::from_pixel(&[2.0, 0.0], 0, 1);
        let cost = MergeCriteria::new(0.0, 0.0).cost(&a, &b, 1);
        // 1/2 * (4 + 0) / 2
        assert!((cost - 1.0).abs() < 1e-12);
    }

    #[test]
    fn larger_small_region_costs_more() {
        let criteria = MergeCriteria::new(0.0, 0.5);
        let mut big = pixel(0.0, 0, 0);
        for col in 1..10 {
            big.absorb(&pixel(0.0, 0, col), 1);
        }
        let single = pixel(3.0, 1, 0);
        let mut pair = pixel(3.0, 1, 0);
        pair.absorb(&pixel(3.0, 1, 1), 1);
        let absorb_single = criteria.cost(&big, &single, 1);
        let absorb_pair = criteria.cost(&big, &pair, 2);
        assert!(absorb_single < absorb_pair);
    }

    #[test]
    fn shape_never_lowers_cost() {
        let a = pixel(0.0, 0, 0);
        let b = pixel(1.0, 0, 1);
        let spectral = MergeCriteria::new(0.0, 0.5).cost(&a, &b, 1);
        for shape in [0.25, 0.5, 1.0] {
            for compactness in [0.0, 0.5, 1.0] {
                let cost = MergeCriteria::new(shape, compactness).cost(&a, &b, 1);
                assert!(cost >= spectral, "shape={shape} c={compactness}");
            }
        }
    }

    #[test]
    fn elongated_merge_costs_more_with_compactness() {
        // A 1x3 strip extended to 1x4 vs a 2x2 block formed from two 1x2 strips.
        let mut strip = pixel(0.0, 0, 0);
        strip.absorb(&pixel(0.0, 0, 1), 1);
        strip.absorb(&pixel(0.0, 0, 2), 1);
        let tail = pixel(1.0, 0, 3);

        let mut top = pixel(0.0, 0, 0);
        top.absorb(&pixel(0.0, 0, 1), 1);
        let mut bottom = pixel(1.0, 1, 0);
        bottom.absorb(&pixel(1.0, 1, 1), 1);

        let criteria = MergeCriteria::new(1.0, 1.0);
        let spectral = MergeCriteria::new(0.0, 1.0);
        let line_factor = criteria.cost(&strip, &tail, 1) / spectral.cost(&strip, &tail, 1);
        let block_factor = criteria.cost(&top, &bottom, 2) / spectral.cost(&top, &bottom, 2);
        assert!(line_factor > block_factor);
        assert!((block_factor - 1.0).abs() < 1e-12);
    }
}
