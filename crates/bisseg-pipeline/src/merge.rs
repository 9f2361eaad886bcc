//! Merge engine: repeatedly fuse the cheapest adjacent pair of regions.
//!
//! Candidates are kept in a min-heap keyed by `(cost, a, b)` with
//! `a < b`. Each region carries a version stamp that changes whenever
//! its statistics change; a heap entry remembers the stamps it was
//! scored with and is discarded when popped stale. After a merge only
//! the pairs touching the survivor are rescored, every other entry
//! stays valid because neither endpoint changed.
//!
//! The lower id of the cheapest pair survives, and equal costs break
//! towards the lowest `a`, then the lowest `b`, which makes every run
//! on the same input produce the same merge sequence.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::cost::MergeCriteria;
use crate::region::{RegionId, RegionModel};
use crate::types::SegmentError;

/// A scored adjacent pair.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    a: RegionId,
    b: RegionId,
    stamp_a: u32,
    stamp_b: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Reversed so that `BinaryHeap` pops the cheapest, lowest-id pair.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.a.cmp(&self.a))
            .then_with(|| other.b.cmp(&self.b))
    }
}

/// Merge state over one region model, resumable across thresholds.
#[derive(Debug)]
pub struct Merger {
    model: RegionModel,
    criteria: MergeCriteria,
    queue: BinaryHeap<Candidate>,
    stamps: Vec<u32>,
    merges: usize,
}

impl Merger {
    /// Score every adjacent pair of `model`.
    #[must_use]
    pub fn new(model: RegionModel, criteria: MergeCriteria) -> Self {
        let mut merger = Self {
            stamps: vec![0; model.capacity()],
            queue: BinaryHeap::new(),
            model,
            criteria,
            merges: 0,
        };
        let pairs: Vec<(RegionId, RegionId, u32)> = merger
            .model
            .regions()
            .flat_map(|(id, region)| {
                region
                    .neighbors
                    .range(id + 1..)
                    .map(move |(&n, &shared)| (id, n, shared))
            })
            .collect();
        merger.queue.reserve(pairs.len());
        for (a, b, shared) in pairs {
            merger.push(a, b, shared);
        }
        merger
    }

    /// The region model in its current state.
    #[must_use]
    pub const fn model(&self) -> &RegionModel {
        &self.model
    }

    /// Consume the engine and hand back the model.
    #[must_use]
    pub fn into_model(self) -> RegionModel {
        self.model
    }

    /// Total merges performed so far.
    #[must_use]
    pub const fn merges(&self) -> usize {
        self.merges
    }

    /// Cost limit for a threshold: pairs merge while `cost < t²`.
    #[must_use]
    pub fn limit(threshold: u32) -> f64 {
        let t = f64::from(threshold);
        t * t
    }

    /// Merge until no adjacent pair costs less than `threshold²`.
    ///
    /// Returns the number of merges performed by this call. Calling it
    /// again with a larger threshold continues from the current state.
    ///
    /// # Errors
    ///
    /// Propagates [`SegmentError::InvalidMerge`] from the region model,
    /// which only happens if the adjacency invariants were broken.
    pub fn merge_below(&mut self, threshold: u32) -> Result<usize, SegmentError> {
        let limit = Self::limit(threshold);
        let before = self.merges;
        while let Some(top) = self.queue.peek().copied() {
            if !self.is_current(&top) {
                self.queue.pop();
                continue;
            }
            if top.cost >= limit {
                break;
            }
            self.queue.pop();
            self.model.merge(top.a, top.b)?;
            self.merges += 1;
            self.stamps[top.a as usize] = self.stamps[top.a as usize].wrapping_add(1);
            self.rescore(top.a);
        }
        let performed = self.merges - before;
        log::debug!(
            "threshold {threshold}: {performed} merges, {} regions left",
            self.model.region_count()
        );
        Ok(performed)
    }

    /// Cheapest current cost, or `None` when no adjacent pair remains.
    #[must_use]
    pub fn next_cost(&mut self) -> Option<f64> {
        while let Some(top) = self.queue.peek().copied() {
            if self.is_current(&top) {
                return Some(top.cost);
            }
            self.queue.pop();
        }
        None
    }

    fn is_current(&self, candidate: &Candidate) -> bool {
        self.model.region(candidate.a).is_some()
            && self.model.region(candidate.b).is_some()
            && self.stamps[candidate.a as usize] == candidate.stamp_a
            && self.stamps[candidate.b as usize] == candidate.stamp_b
    }

    fn rescore(&mut self, id: RegionId) {
        let neighbors: Vec<(RegionId, u32)> = self.model.neighbors(id).collect();
        for (neighbor, shared) in neighbors {
            self.push(id.min(neighbor), id.max(neighbor), shared);
        }
    }

    fn push(&mut self, a: RegionId, b: RegionId, shared: u32) {
        let (Some(ra), Some(rb)) = (self.model.region(a), self.model.region(b)) else {
            return;
        };
        let cost = self.criteria.cost(&ra.stats, &rb.stats, shared);
        self.queue.push(Candidate {
            cost,
            a,
            b,
            stamp_a: self.stamps[a as usize],
            stamp_b: self.stamps[b as usize],
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Raster;

    fn merger(rows: usize, cols: usize, values: &[f64], shape: f64) -> Merger {
        let raster = Raster::new(rows, cols, 1, values.to_vec()).unwrap();
        let model = RegionModel::initialize(&raster, None).unwrap();
        Merger::new(model, MergeCriteria::new(shape, 0.5))
    }

    #[test]
    fn candidate_order_prefers_low_cost_then_low_ids() {
        let mut heap = BinaryHeap::new();
        for (cost, a, b) in [(2.0, 0, 1), (1.0, 5, 6), (1.0, 3, 9), (1.0, 3, 4)] {
            heap.push(Candidate {
                cost,
                a,
                b,
                stamp_a: 0,
                stamp_b: 0,
            });
        }
        let order: Vec<(RegionId, RegionId)> =
            std::iter::from_fn(|| heap.pop().map(|c| (c.a, c.b))).collect();
        assert_eq!(order, vec![(3, 4), (3, 9), (5, 6), (0, 1)]);
    }

    #[test]
    fn single_pixel_needs_no_merges() {
        let mut engine = merger(1, 1, &[3.0], 0.5);
        assert_eq!(engine.merge_below(100).unwrap(), 0);
        assert_eq!(engine.model().region_count(), 1);
        assert!(engine.next_cost().is_none());
    }

    #[test]
    fn uniform_image_collapses_at_threshold_one() {
        let mut engine = merger(3, 3, &[4.0; 9], 0.5);
        assert_eq!(engine.merge_below(1).unwrap(), 8);
        assert_eq!(engine.model().region_count(), 1);
        assert_eq!(engine.model().snapshot_labels().as_slice(), &[0; 9]);
    }

    #[test]
    fn overflowing_regions_stop_merging() {
        // Each half sums past f64::MAX; their means are both infinite.
        let mut engine = merger(1, 4, &[1e308; 4], 0.5);
        assert_eq!(engine.merge_below(u32::MAX).unwrap(), 2);
        assert_eq!(engine.model().snapshot_labels().as_slice(), &[0, 0, 2, 2]);
    }

    #[test]
    fn threshold_zero_merges_nothing() {
        let mut engine = merger(2, 2, &[1.0; 4], 0.5);
        assert_eq!(engine.merge_below(0).unwrap(), 0);
        assert_eq!(engine.model().region_count(), 4);
    }

    #[test]
    fn stops_at_threshold_and_resumes() {
        // Two flat halves 10 apart.
        let values = [0.0, 0.0, 10.0, 10.0, 0.0, 0.0, 10.0, 10.0];
        let mut engine = merger(2, 4, &values, 0.0);
        engine.merge_below(1).unwrap();
        assert_eq!(engine.model().region_count(), 2);
        let labels = engine.model().snapshot_labels();
        assert_eq!(labels.as_slice(), &[0, 0, 2, 2, 0, 0, 2, 2]);
        // Ward cost of the halves: 4*4/8 * 100 = 200, so t=14 (196) is not enough.
        engine.merge_below(14).unwrap();
        assert_eq!(engine.model().region_count(), 2);
        engine.merge_below(15).unwrap();
        assert_eq!(engine.model().region_count(), 1);
        assert_eq!(engine.merges(), 7);
    }

    #[test]
    fn equal_costs_break_ties_by_lowest_ids() {
        // 0 | 5 | 10: both pairs cost 12.5, (0, 1) wins and the
        // follow-up pair costs 37.5, above the limit of 16.
        let mut engine = merger(1, 3, &[0.0, 5.0, 10.0], 0.0);
        engine.merge_below(4).unwrap();
        assert_eq!(engine.model().region_count(), 2);
        assert_eq!(engine.model().snapshot_labels().as_slice(), &[0, 0, 2]);
    }

    #[test]
    fn deterministic_across_runs() {
        let values: Vec<f64> = (0..64u32).map(|i| f64::from(i * 37 % 11)).collect();
        let run = || {
            let mut engine = merger(8, 8, &values, 0.3);
            engine.merge_below(3).unwrap();
            engine.model().snapshot_labels()
        };
        assert_eq!(run(), run());
    }
}
