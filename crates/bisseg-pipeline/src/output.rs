//! Output assembly: turn a raw region-id snapshot into a label grid.

use crate::region::NODATA;
use crate::types::LabelGrid;

/// Relabel a snapshot densely in row-major first-appearance order.
///
/// With `nodata` set, nodata pixels become label 0 and regions start at
/// 1, so 0 means background at every threshold. Otherwise regions start
/// at 0.
#[must_use]
pub fn assemble(raw: &LabelGrid, nodata: bool) -> LabelGrid {
    let first = u32::from(nodata);
    let capacity = raw.as_slice().len();
    let mut table = vec![NODATA; capacity];
    let mut next = first;
    let labels = raw
        .as_slice()
        .iter()
        .map(|&id| {
            if id == NODATA {
                return 0;
            }
            let slot = &mut table[id as usize];
            if *slot == NODATA {
                *slot = next;
                next += 1;
            }
            *slot
        })
        .collect();
    LabelGrid::from_raw(raw.rows(), raw.cols(), labels)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn relabels_from_zero_without_nodata() {
        let raw = LabelGrid::new(2, 3, vec![4, 4, 2, 5, 2, 2]).unwrap();
        let out = assemble(&raw, false);
        assert_eq!(out.as_slice(), &[0, 0, 1, 2, 1, 1]);
    }

    #[test]
    fn reserves_zero_for_nodata() {
        let raw = LabelGrid::new(1, 4, vec![NODATA, 1, 1, 3]).unwrap();
        let out = assemble(&raw, true);
        assert_eq!(out.as_slice(), &[0, 1, 1, 2]);
        assert_eq!(out.max_label(), 2);
    }

    #[test]
    fn region_on_first_pixel_is_never_zero_with_nodata() {
        let raw = LabelGrid::new(1, 2, vec![0, NODATA]).unwrap();
        assert_eq!(assemble(&raw, true).as_slice(), &[1, 0]);
    }
}
