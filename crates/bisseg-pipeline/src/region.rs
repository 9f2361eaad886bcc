//! Region model: the pixel partition and the region adjacency graph.
//!
//! Regions live in a dense arena indexed by [`RegionId`]. A fresh model
//! has one region per valid pixel, with the pixel's row-major index as
//! its id. Merging retires the absorbed id (its arena slot becomes
//! `None`) and records where it went in a parent table, so every pixel
//! can still be resolved to its surviving region without rescanning.
//!
//! Each region caches the exact aggregates the merge cost needs: pixel
//! count, per-band sums and sums of squares, perimeter and bounding box.
//! Adjacency is stored on both endpoints as neighbor -> shared boundary
//! length, in ordered maps so iteration is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{LabelGrid, Raster, SegmentError};

/// Region identifier. Dense within one model, never reused after retirement.
pub type RegionId = u32;

/// Marker for pixels that belong to no region (nodata).
pub const NODATA: RegionId = RegionId::MAX;

/// Axis-aligned bounding box in pixel coordinates, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// First row covered.
    pub min_row: u32,
    /// First column covered.
    pub min_col: u32,
    /// Last row covered.
    pub max_row: u32,
    /// Last column covered.
    pub max_col: u32,
}

impl BoundingBox {
    /// Box covering a single pixel.
    #[must_use]
    pub const fn pixel(row: u32, col: u32) -> Self {
        Self {
            min_row: row,
            min_col: col,
            max_row: row,
            max_col: col,
        }
    }

    /// Smallest box covering both boxes.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            min_row: self.min_row.min(other.min_row),
            min_col: self.min_col.min(other.min_col),
            max_row: self.max_row.max(other.max_row),
            max_col: self.max_col.max(other.max_col),
        }
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.max_row - self.min_row + 1
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.max_col - self.min_col + 1
    }

    /// Perimeter of the box in pixel edges.
    #[must_use]
    pub fn perimeter(self) -> u64 {
        2 * (u64::from(self.height()) + u64::from(self.width()))
    }

    /// The same box moved down by `rows`.
    #[must_use]
    pub const fn shifted_down(self, rows: u32) -> Self {
        Self {
            min_row: self.min_row + rows,
            min_col: self.min_col,
            max_row: self.max_row + rows,
            max_col: self.max_col,
        }
    }
}

/// Aggregate statistics of one region.
///
/// Always the exact aggregate of the member pixels: merging adds the
/// counts and sums, so no value is ever recomputed from pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    /// Number of member pixels.
    pub pixel_count: u64,
    /// Per-band sum of member samples.
    pub sum: Vec<f64>,
    /// Per-band sum of squared member samples.
    pub sum_sq: Vec<f64>,
    /// Boundary length in pixel edges, image border included.
    pub perimeter: u64,
    /// Bounding box of the member pixels.
    pub bbox: BoundingBox,
}

impl RegionStats {
    /// Statistics of a single pixel.
    #[must_use]
    pub fn from_pixel(values: &[f64], row: u32, col: u32) -> Self {
        Self {
            pixel_count: 1,
            sum: values.to_vec(),
            sum_sq: values.iter().map(|v| v * v).collect(),
            perimeter: 4,
            bbox: BoundingBox::pixel(row, col),
        }
    }

    /// Number of bands.
    #[must_use]
    pub fn bands(&self) -> usize {
        self.sum.len()
    }

    /// Mean of `band`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self, band: usize) -> f64 {
        self.sum[band] / self.pixel_count as f64
    }

    /// Population variance of `band`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn variance(&self, band: usize) -> f64 {
        let n = self.pixel_count as f64;
        let mean = self.sum[band] / n;
        (self.sum_sq[band] / n - mean * mean).max(0.0)
    }

    /// Fold `other` into `self`; the two regions share `shared` edges.
    pub fn absorb(&mut self, other: &Self, shared: u64) {
        self.pixel_count += other.pixel_count;
        for (acc, v) in self.sum.iter_mut().zip(&other.sum) {
            *acc += v;
        }
        for (acc, v) in self.sum_sq.iter_mut().zip(&other.sum_sq) {
            *acc += v;
        }
        self.perimeter = self.perimeter + other.perimeter - 2 * shared;
        self.bbox = self.bbox.union(other.bbox);
    }
}

/// A live region: its statistics and its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Cached aggregates.
    pub stats: RegionStats,
    /// Neighbor id -> number of shared pixel edges.
    pub neighbors: BTreeMap<RegionId, u32>,
}

/// The mutable partition of a raster into regions.
#[derive(Debug, Clone)]
pub struct RegionModel {
    rows: usize,
    cols: usize,
    bands: usize,
    /// Region each pixel started in, or [`NODATA`].
    pixel_region: Vec<RegionId>,
    /// Region an id was absorbed into; `parent[id] == id` while active.
    parent: Vec<RegionId>,
    regions: Vec<Option<Region>>,
    active: usize,
}

impl RegionModel {
    /// Build the one-region-per-pixel model with 4-connected adjacency.
    ///
    /// Pixels whose every band equals `nodata` get no region.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidData`] if any sample is NaN or
    /// infinite, and [`SegmentError::Shape`] if the raster has zero area,
    /// no bands, or more pixels than the region id space holds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn initialize(raster: &Raster, nodata: Option<f64>) -> Result<Self, SegmentError> {
        let (rows, cols, bands) = (raster.rows(), raster.cols(), raster.bands());
        if rows == 0 || cols == 0 || bands == 0 {
            return Err(SegmentError::Shape(format!(
                "cannot segment a {rows}x{cols}x{bands} raster"
            )));
        }
        let pixel_count = raster.pixel_count();
        if u32::try_from(pixel_count).map_or(true, |n| n >= NODATA) {
            return Err(SegmentError::Shape(format!(
                "{pixel_count} pixels exceed the region id space"
            )));
        }

        raster.check_finite()?;

        let is_nodata = |pixel: usize| {
            nodata.is_some_and(|nd| raster.pixel_at(pixel).iter().all(|&v| v == nd))
        };

        let mut pixel_region = Vec::with_capacity(pixel_count);
        let mut regions: Vec<Option<Region>> = Vec::with_capacity(pixel_count);
        for pixel in 0..pixel_count {
            if is_nodata(pixel) {
                pixel_region.push(NODATA);
                regions.push(None);
            } else {
                let id = pixel as RegionId;
                let (row, col) = ((pixel / cols) as u32, (pixel % cols) as u32);
                pixel_region.push(id);
                regions.push(Some(Region {
                    stats: RegionStats::from_pixel(raster.pixel_at(pixel), row, col),
                    neighbors: BTreeMap::new(),
                }));
            }
        }

        let mut model = Self {
            rows,
            cols,
            bands,
            parent: (0..pixel_count).map(|p| p as RegionId).collect(),
            active: pixel_region.iter().filter(|&&id| id != NODATA).count(),
            pixel_region,
            regions,
        };

        for row in 0..rows {
            for col in 0..cols {
                let here = model.pixel_region[row * cols + col];
                if here == NODATA {
                    continue;
                }
                if col + 1 < cols {
                    model.add_boundary(here, model.pixel_region[row * cols + col + 1], 1);
                }
                if row + 1 < rows {
                    model.add_boundary(here, model.pixel_region[(row + 1) * cols + col], 1);
                }
            }
        }

        Ok(model)
    }

    /// Assemble a model from precomputed parts. Used by stitching.
    ///
    /// `parent` starts as the identity; adjacency is added afterwards
    /// through [`Self::add_boundary`].
    pub(crate) fn from_parts(
        rows: usize,
        cols: usize,
        bands: usize,
        pixel_region: Vec<RegionId>,
        stats: Vec<RegionStats>,
    ) -> Self {
        let active = stats.len();
        #[allow(clippy::cast_possible_truncation)]
        let parent = (0..stats.len()).map(|i| i as RegionId).collect();
        Self {
            rows,
            cols,
            bands,
            pixel_region,
            parent,
            regions: stats
                .into_iter()
                .map(|stats| {
                    Some(Region {
                        stats,
                        neighbors: BTreeMap::new(),
                    })
                })
                .collect(),
            active,
        }
    }

    /// Record `length` shared edges between two distinct active regions.
    ///
    /// Ignores nodata, self pairs and retired ids.
    pub(crate) fn add_boundary(&mut self, a: RegionId, b: RegionId, length: u32) {
        if a == b || a == NODATA || b == NODATA {
            return;
        }
        if self.region(a).is_none() || self.region(b).is_none() {
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            if let Some(region) = self.regions[from as usize].as_mut() {
                *region.neighbors.entry(to).or_insert(0) += length;
            }
        }
    }

    /// Number of rows of the modelled raster.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns of the modelled raster.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Number of bands of the modelled raster.
    #[must_use]
    pub const fn bands(&self) -> usize {
        self.bands
    }

    /// Number of active regions.
    #[must_use]
    pub const fn region_count(&self) -> usize {
        self.active
    }

    /// Size of the id space (active and retired ids).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.regions.len()
    }

    /// Number of nodata pixels.
    #[must_use]
    pub fn nodata_pixels(&self) -> usize {
        self.pixel_region.iter().filter(|&&id| id == NODATA).count()
    }

    /// The active region with `id`, or `None` if retired or unknown.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id as usize).and_then(Option::as_ref)
    }

    /// Iterate over active regions in id order.
    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.regions.iter().enumerate().filter_map(|(i, slot)| {
            #[allow(clippy::cast_possible_truncation)]
            slot.as_ref().map(|region| (i as RegionId, region))
        })
    }

    /// Neighbors of an active region with shared boundary lengths.
    pub fn neighbors(&self, id: RegionId) -> impl Iterator<Item = (RegionId, u32)> + '_ {
        self.region(id)
            .into_iter()
            .flat_map(|region| region.neighbors.iter().map(|(&n, &len)| (n, len)))
    }

    /// Follow the parent table from `id` to the active region holding it.
    #[must_use]
    pub fn resolve(&self, mut id: RegionId) -> RegionId {
        if id == NODATA {
            return NODATA;
        }
        while self.parent[id as usize] != id {
            id = self.parent[id as usize];
        }
        id
    }

    /// Absorb region `absorb` into region `keep`.
    ///
    /// Counts, sums and sums of squares add; the perimeter loses twice
    /// the shared boundary; boundary lengths to common neighbors add up.
    /// `absorb` is retired and resolves to `keep` from now on.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidMerge`] if the ids are equal,
    /// either one is not active, or they are not adjacent.
    pub fn merge(&mut self, keep: RegionId, absorb: RegionId) -> Result<(), SegmentError> {
        let invalid = |reason| SegmentError::InvalidMerge {
            keep,
            absorb,
            reason,
        };
        if keep == absorb {
            return Err(invalid("a region cannot absorb itself"));
        }
        if self.region(keep).is_none() || self.region(absorb).is_none() {
            return Err(invalid("both regions must be active"));
        }
        let Some(&shared) = self.region(keep).and_then(|r| r.neighbors.get(&absorb)) else {
            return Err(invalid("regions are not adjacent"));
        };

        let Some(absorbed) = self.regions[absorb as usize].take() else {
            return Err(invalid("both regions must be active"));
        };
        let Some(mut survivor) = self.regions[keep as usize].take() else {
            self.regions[absorb as usize] = Some(absorbed);
            return Err(invalid("both regions must be active"));
        };

        survivor.stats.absorb(&absorbed.stats, u64::from(shared));
        survivor.neighbors.remove(&absorb);
        for (&neighbor, &length) in &absorbed.neighbors {
            if neighbor == keep {
                continue;
            }
            *survivor.neighbors.entry(neighbor).or_insert(0) += length;
            if let Some(other) = self.regions[neighbor as usize].as_mut() {
                other.neighbors.remove(&absorb);
                *other.neighbors.entry(keep).or_insert(0) += length;
            }
        }

        self.regions[keep as usize] = Some(survivor);
        self.parent[absorb as usize] = keep;
        self.active -= 1;
        Ok(())
    }

    /// Active region id of every id in the id space, resolved in one pass.
    fn resolved_ids(&self) -> Vec<RegionId> {
        let mut resolved = vec![NODATA; self.parent.len()];
        let mut path = Vec::new();
        for start in 0..self.parent.len() {
            if resolved[start] != NODATA {
                continue;
            }
            let mut id = start;
            while resolved[id] == NODATA && self.parent[id] as usize != id {
                path.push(id);
                id = self.parent[id] as usize;
            }
            let root = if resolved[id] == NODATA {
                #[allow(clippy::cast_possible_truncation)]
                let root = id as RegionId;
                resolved[id] = root;
                root
            } else {
                resolved[id]
            };
            for visited in path.drain(..) {
                resolved[visited] = root;
            }
        }
        resolved
    }

    /// Grid of active region ids per pixel, [`NODATA`] for nodata pixels.
    #[must_use]
    pub fn snapshot_labels(&self) -> LabelGrid {
        let resolved = self.resolved_ids();
        let labels = self
            .pixel_region
            .iter()
            .map(|&id| if id == NODATA { NODATA } else { resolved[id as usize] })
            .collect();
        LabelGrid::from_raw(self.rows, self.cols, labels)
    }
}
