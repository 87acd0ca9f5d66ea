//! Precomputed crystal-pair table: for a given (subset, segment) pair,
//! the ordered list of crystal pairs a back-projection needs to walk,
//! plus the bin index in the full (non-subsetted) projection each one
//! corresponds to.

use std::sync::atomic::{AtomicU16, Ordering};

use log::debug;

use crate::error::{PetError, Result};
use crate::proj_geom::ProjLayout;

const INVALID: u16 = u16::MAX;

#[derive(Debug)]
struct Lor {
    /// Atomic so `disable_lor` can be called from inside a parallel
    /// back-projection loop through a shared `&LorCache`; each index is
    /// only ever written by the one iteration that owns it.
    crystal1: AtomicU16,
    crystal2: u16,
}

impl Clone for Lor {
    fn clone(&self) -> Self {
        Self {
            crystal1: AtomicU16::new(self.crystal1.load(Ordering::Relaxed)),
            crystal2: self.crystal2,
        }
    }
}

/// Crystal-pair cache for every (subset, segment) combination implied
/// by a projection layout.
///
/// Construction requires `nViews` to be a multiple of `nSubsets`; a
/// crystal pair packs as `axialCoord * nCrystalsPerRing + angCoord`
/// into a `u16`, so scanners with more than 65536 crystals per ring
/// are out of reach here, as they were for the packed representation
/// this is grounded on.
pub struct LorCache {
    n_subsets: i32,
    n_views_per_subset: i32,
    n_crystals_per_ring: i32,
    seg_offset: i32,
    n_bins_per_view: Vec<i32>,
    /// `table[subset][seg + segOffset]` is the crystal-pair list for
    /// that (subset, segment).
    table: Vec<Vec<Vec<Lor>>>,
    current_subset: i32,
    current_segment: i32,
}

impl LorCache {
    pub fn new(layout: &ProjLayout, n_subsets: i32) -> Result<Self> {
        let h = &layout.header;
        let g = &layout.geometry;

        if n_subsets <= 0 || g.n_views % n_subsets != 0 {
            return Err(PetError::Config(format!(
                "number of subsets must be a positive divisor of {} views",
                g.n_views
            )));
        }

        debug!(
            "building LOR cache: {n_subsets} subsets, {} segments, {} views",
            h.n_segments, g.n_views
        );

        let n_views_per_subset = g.n_views / n_subsets;
        let seg_offset = g.seg_offset;

        let n_bins_per_view: Vec<i32> = (-seg_offset..=seg_offset)
            .map(|seg| g.n_axial_coords(seg) as i32 * h.n_tang_coords)
            .collect();

        let mut table = Vec::with_capacity(n_subsets as usize);
        for subset in 0..n_subsets {
            let mut per_segment = Vec::with_capacity(h.n_segments as usize);
            for seg in -seg_offset..=seg_offset {
                let n_bins_for_view = n_bins_per_view[(seg + seg_offset) as usize];
                let n_bins = n_views_per_subset * n_bins_for_view;
                let mut lors = Vec::with_capacity(n_bins as usize);

                for subset_view in 0..n_views_per_subset {
                    let view = subset + subset_view * n_subsets;
                    for axial_coord in 0..g.n_axial_coords(seg) as i32 {
                        let (a1, a2) = layout.crystal_axial(seg, axial_coord);
                        for tang_coord in -g.tang_coord_offset..-g.tang_coord_offset + h.n_tang_coords {
                            let (c1, c2) = layout.crystal_ang(view, tang_coord);
                            lors.push(Lor {
                                crystal1: AtomicU16::new((a1 * h.n_crystals_per_ring + c1) as u16),
                                crystal2: (a2 * h.n_crystals_per_ring + c2) as u16,
                            });
                        }
                    }
                }
                per_segment.push(lors);
            }
            table.push(per_segment);
        }

        Ok(Self {
            n_subsets,
            n_views_per_subset,
            n_crystals_per_ring: h.n_crystals_per_ring,
            seg_offset,
            n_bins_per_view,
            table,
            current_subset: 0,
            current_segment: 0,
        })
    }

    /// Points the cache at (subset, segment) and returns the number of
    /// entries for that pair.
    pub fn set_subset_and_segment(&mut self, subset: i32, seg: i32) -> usize {
        self.current_subset = subset;
        self.current_segment = seg;
        self.table[subset as usize][(seg + self.seg_offset) as usize].len()
    }

    /// `(valid, binIndex, crystalAxial1, crystalAng1, crystalAxial2, crystalAng2)`.
    /// `binIndex` is the bin's position in the full, non-subsetted
    /// per-segment bin array; use it with `ProjData::bin_at`.
    pub fn get_lor(&self, index: usize) -> (bool, usize, i32, i32, i32, i32) {
        let n_bins_per_view =
            self.n_bins_per_view[(self.current_segment + self.seg_offset) as usize] as usize;

        let bin_index = if self.n_subsets == 1 {
            index
        } else {
            self.current_subset as usize * n_bins_per_view
                + index / n_bins_per_view * self.n_subsets as usize * n_bins_per_view
                + index % n_bins_per_view
        };

        let lor = &self.table[self.current_subset as usize]
            [(self.current_segment + self.seg_offset) as usize][index];

        let crystal1 = lor.crystal1.load(Ordering::Relaxed);
        let valid = crystal1 != INVALID;
        if !valid {
            return (false, bin_index, 0, 0, 0, 0);
        }

        let n = self.n_crystals_per_ring;
        (
            true,
            bin_index,
            crystal1 as i32 / n,
            crystal1 as i32 % n,
            lor.crystal2 as i32 / n,
            lor.crystal2 as i32 % n,
        )
    }

    /// Marks a LOR as never intersecting the volume, so later
    /// iterations skip it without retracing. Callable through a shared
    /// reference so it can run from inside a parallel back-projection
    /// loop.
    pub fn disable_lor(&self, index: usize) {
        self.table[self.current_subset as usize][(self.current_segment + self.seg_offset) as usize]
            [index]
            .crystal1
            .store(INVALID, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proj_geom::ProjHeader;

    fn layout() -> ProjLayout {
        ProjLayout::new(ProjHeader {
            n_rings: 4,
            n_crystals_per_ring: 16,
            segment_span: 1,
            n_segments: 3,
            n_tang_coords: 0,
        })
        .unwrap()
    }

    #[test]
    fn rejects_non_divisor_subset_count() {
        assert!(LorCache::new(&layout(), 3).is_err());
    }

    #[test]
    fn bin_index_identity_for_single_subset() {
        let mut cache = LorCache::new(&layout(), 1).unwrap();
        let n = cache.set_subset_and_segment(0, 0);
        for i in 0..n {
            let (_, bin_index, ..) = cache.get_lor(i);
            assert_eq!(bin_index, i);
        }
    }

    #[test]
    fn disable_marks_entry_invalid() {
        let mut cache = LorCache::new(&layout(), 2).unwrap();
        cache.set_subset_and_segment(0, 0);
        let (valid_before, ..) = cache.get_lor(0);
        assert!(valid_before);
        cache.disable_lor(0);
        let (valid_after, ..) = cache.get_lor(0);
        assert!(!valid_after);
    }

    #[test]
    fn round_trips_crystal_coordinates_through_binof() {
        let l = layout();
        let mut cache = LorCache::new(&l, 2).unwrap();
        for seg in -l.geometry.seg_offset..=l.geometry.seg_offset {
            let n = cache.set_subset_and_segment(0, seg);
            for i in 0..n {
                let (valid, _, a1, c1, a2, c2) = cache.get_lor(i);
                assert!(valid);
                assert_eq!(l.bin_of(a1, c1, a2, c2).map(|(s, ..)| s), Some(seg));
            }
        }
    }
}
