//! Frozen strip state: the handoff between strip workers and stitching.
//!
//! A frozen strip is a plain value (no references into the model it came
//! from) so it can cross a thread or process boundary. Local region ids
//! are dense and assigned in row-major first-appearance order. Merges
//! always keep the lower id, so an active region's id is its first pixel
//! and this order matches the id order inside the model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::region::{NODATA, RegionId, RegionModel, RegionStats};
use crate::types::SegmentError;

/// One adjacency between two local regions, `a < b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenEdge {
    /// Lower local id.
    pub a: u32,
    /// Higher local id.
    pub b: u32,
    /// Shared boundary length in pixel edges.
    pub shared: u32,
}

/// Snapshot of a partially merged strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenTileState {
    /// Rows of the strip.
    pub rows: usize,
    /// Columns of the strip (the full image width).
    pub cols: usize,
    /// Bands per pixel.
    pub bands: usize,
    /// Local region id per pixel, row-major; [`NODATA`] for nodata pixels.
    pub labels: Vec<u32>,
    /// Statistics of each local region, indexed by local id. Bounding
    /// boxes are in strip coordinates.
    pub regions: Vec<RegionStats>,
    /// Adjacency inside the strip, sorted by `(a, b)`.
    pub edges: Vec<FrozenEdge>,
}

impl FrozenTileState {
    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Shape`] describing the first inconsistency:
    /// an empty strip, a label table of the wrong size, a label or edge
    /// pointing past the region table, a self edge, or region statistics
    /// with the wrong band count.
    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(SegmentError::Shape(format!(
                "empty {}x{} strip",
                self.rows, self.cols
            )));
        }
        let expected = self.rows.checked_mul(self.cols);
        if expected != Some(self.labels.len()) {
            return Err(SegmentError::Shape(format!(
                "{} labels for a {}x{} strip",
                self.labels.len(),
                self.rows,
                self.cols
            )));
        }
        let count = self.regions.len();
        if let Some(label) = self
            .labels
            .iter()
            .find(|&&l| l != NODATA && l as usize >= count)
        {
            return Err(SegmentError::Shape(format!(
                "label {label} outside {count} regions"
            )));
        }
        if let Some(edge) = self
            .edges
            .iter()
            .find(|e| e.a >= e.b || e.b as usize >= count)
        {
            return Err(SegmentError::Shape(format!(
                "invalid edge {} - {} with {count} regions",
                edge.a, edge.b
            )));
        }
        if let Some(stats) = self
            .regions
            .iter()
            .find(|s| s.bands() != self.bands || s.pixel_count == 0)
        {
            return Err(SegmentError::Shape(format!(
                "region with {} bands and {} pixels in a {}-band strip",
                stats.bands(),
                stats.pixel_count,
                self.bands
            )));
        }
        Ok(())
    }

    /// Number of regions in the strip.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

impl RegionModel {
    /// Freeze the current partition into a self-contained snapshot.
    #[must_use]
    pub fn freeze(&self) -> FrozenTileState {
        let snapshot = self.snapshot_labels();
        let mut local: BTreeMap<RegionId, u32> = BTreeMap::new();
        let mut order = Vec::with_capacity(self.region_count());
        let labels = snapshot
            .as_slice()
            .iter()
            .map(|&id| {
                if id == NODATA {
                    return NODATA;
                }
                #[allow(clippy::cast_possible_truncation)]
                let next = order.len() as u32;
                *local.entry(id).or_insert_with(|| {
                    order.push(id);
                    next
                })
            })
            .collect();

        let regions = order
            .iter()
            .filter_map(|&id| self.region(id).map(|r| r.stats.clone()))
            .collect();

        let local = &local;
        let mut edges: Vec<FrozenEdge> = order
            .iter()
            .flat_map(|&id| {
                let a = local[&id];
                self.neighbors(id).filter_map(move |(n, shared)| {
                    let b = *local.get(&n)?;
                    (a < b).then_some(FrozenEdge { a, b, shared })
                })
            })
            .collect();
        edges.sort_unstable_by_key(|e| (e.a, e.b));

        FrozenTileState {
            rows: self.rows(),
            cols: self.cols(),
            bands: self.bands(),
            labels,
            regions,
            edges,
        }
    }
}
