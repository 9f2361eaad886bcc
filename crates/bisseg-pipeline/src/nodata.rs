//! Seam repair for label grids produced with a nodata sentinel.
//!
//! The first pixel of the last row of every former strip (and of the
//! last image row) may be left on background label 0 even though it
//! holds data. The repair copies the label immediately east into it.
//!
//! In this crate the pass is a guard that never fires: output assembly
//! gives every data pixel a non-zero label and the nodata mask keeps the
//! pass off real background, so on pipeline output it changes nothing.
//! It matters for grids assembled elsewhere, such as labels stitched by
//! an external tool that left seam pixels on 0.

use crate::types::LabelGrid;

/// Rows checked by [`repair_seams`]: `k·tile_rows − 1` for every strip
/// boundary, plus the last row.
#[must_use]
pub fn seam_rows(rows: usize, tile_rows: usize) -> Vec<usize> {
    let step = tile_rows.max(1);
    let mut seams: Vec<usize> = (step..=rows).step_by(step).map(|end| end - 1).collect();
    if rows > 0 && seams.last() != Some(&(rows - 1)) {
        seams.push(rows - 1);
    }
    seams
}

/// Patch seam-row artifacts in place and return how many cells changed.
///
/// A seam row's first cell is patched when its label is 0, its east
/// neighbor is not, and `mask` (one flag per pixel, `true` for nodata)
/// does not mark the cell itself as nodata. Running it twice changes
/// nothing the second time.
pub fn repair_seams(grid: &mut LabelGrid, tile_rows: usize, mask: Option<&[bool]>) -> usize {
    let (rows, cols) = (grid.rows(), grid.cols());
    if cols < 2 {
        return 0;
    }
    let mut patched = 0;
    for row in seam_rows(rows, tile_rows) {
        let index = row * cols;
        let is_nodata = mask.is_some_and(|m| m.get(index).copied().unwrap_or(false));
        let labels = grid.as_mut_slice();
        if labels[index] == 0 && labels[index + 1] != 0 && !is_nodata {
            labels[index] = labels[index + 1];
            patched += 1;
        }
    }
    if patched > 0 {
        log::debug!("repaired {patched} seam pixels");
    }
    patched
}
