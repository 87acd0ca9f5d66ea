//! Sinogram storage: one contiguous f32 array per segment, plus the
//! bin-by-bin arithmetic operations projectors and the OSEM drivers
//! need.

use rayon::prelude::*;

use crate::error::{PetError, Result};
use crate::geom_types::EPSILON_ARITH;
use crate::proj_geom::ProjLayout;

/// A fully allocated sinogram: `data[seg + segOffset]` is the
/// contiguous bin array for that segment, indexed by
/// `view*nAxialCoords*nTangCoords + axialCoord*nTangCoords + tangCoord+tangCoordOffset`.
#[derive(Debug, Clone)]
pub struct ProjData {
    pub layout: ProjLayout,
    data: Vec<Vec<f32>>,
}

impl ProjData {
    pub fn allocate(layout: ProjLayout, fill: f32) -> Self {
        let data = layout
            .geometry
            .n_axial_coords
            .iter()
            .map(|&n_axial| vec![fill; n_axial * layout.geometry.n_views as usize * layout.header.n_tang_coords as usize])
            .collect();
        Self { layout, data }
    }

    pub fn zeros(layout: ProjLayout) -> Self {
        Self::allocate(layout, 0.0)
    }

    fn index(&self, seg: i32, view: i32, axial_coord: i32, tang_coord: i32) -> (usize, usize) {
        let g = &self.layout.geometry;
        let seg_idx = (seg + g.seg_offset) as usize;
        let n_axial = g.n_axial_coords(seg) as i32;
        let n_tang = self.layout.header.n_tang_coords;
        let local = (view * n_axial * n_tang
            + axial_coord * n_tang
            + (tang_coord + g.tang_coord_offset)) as usize;
        (seg_idx, local)
    }

    pub fn bin(&self, seg: i32, view: i32, axial_coord: i32, tang_coord: i32) -> f32 {
        let (s, i) = self.index(seg, view, axial_coord, tang_coord);
        self.data[s][i]
    }

    pub fn set_bin(&mut self, seg: i32, view: i32, axial_coord: i32, tang_coord: i32, value: f32) {
        let (s, i) = self.index(seg, view, axial_coord, tang_coord);
        self.data[s][i] = value;
    }

    pub fn increment_bin(&mut self, seg: i32, view: i32, axial_coord: i32, tang_coord: i32) {
        let (s, i) = self.index(seg, view, axial_coord, tang_coord);
        self.data[s][i] += 1.0;
    }

    pub fn weight_bin(&mut self, seg: i32, view: i32, axial_coord: i32, tang_coord: i32, weight: f32) {
        let (s, i) = self.index(seg, view, axial_coord, tang_coord);
        self.data[s][i] *= weight;
    }

    /// Bin at (seg, binIndex) where binIndex is the local offset used
    /// by `LorCache::get_lor`.
    pub fn bin_at(&self, seg: i32, bin_index: usize) -> f32 {
        let seg_idx = (seg + self.layout.geometry.seg_offset) as usize;
        self.data[seg_idx][bin_index]
    }

    /// The full bin array for one segment, for callers that split it
    /// further (e.g. into per-view chunks for parallel forward
    /// projection).
    pub fn segment_mut(&mut self, seg: i32) -> &mut [f32] {
        let seg_idx = (seg + self.layout.geometry.seg_offset) as usize;
        &mut self.data[seg_idx]
    }

    /// Element-wise multiply by another projection of the same
    /// header; bins where either operand is `<= EPSILON_ARITH` are
    /// zeroed.
    pub fn mul_assign_guarded(&mut self, other: &ProjData) -> Result<()> {
        if self.layout.header != other.layout.header {
            return Err(PetError::ProjectionMismatch(
                "projection headers do not match".into(),
            ));
        }
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(seg, other_seg)| {
                seg.iter_mut().zip(other_seg.iter()).for_each(|(a, b)| {
                    if *a > EPSILON_ARITH as f32 && *b > EPSILON_ARITH as f32 {
                        *a *= b;
                    } else {
                        *a = 0.0;
                    }
                });
            });
        Ok(())
    }

    /// `exp(bin)` where `bin > EPSILON_ARITH`, else `1.0`.
    pub fn exponential(&mut self) {
        self.data.par_iter_mut().for_each(|seg| {
            seg.iter_mut().for_each(|b| {
                *b = if *b > EPSILON_ARITH as f32 { b.exp() } else { 1.0 };
            });
        });
    }

    /// Divides each bin by the number of ring-pairs collapsed into it
    /// by a span > 1 compression. Explicit opt-in: never called by
    /// the projectors or the OSEM drivers.
    pub fn rebin_weight(&mut self) {
        let h = self.layout.header;
        if h.segment_span == 1 {
            return;
        }
        let g = self.layout.geometry.clone();

        for ring_sum in 0..=2 * (h.n_rings - 1) {
            let mut local_max_ring_diff = if ring_sum <= h.n_rings - 1 {
                ring_sum
            } else {
                2 * (h.n_rings - 1) - ring_sum
            };
            local_max_ring_diff = local_max_ring_diff.min(g.max_ring_diff);
            if (ring_sum + local_max_ring_diff) % 2 != 0 {
                local_max_ring_diff -= 1;
            }

            let mut seg = -g.seg_offset - 1;
            let mut next_ring_diff = -g.max_ring_diff - 1;
            while next_ring_diff < -local_max_ring_diff {
                seg += 1;
                next_ring_diff += h.segment_span;
            }

            let mut weight = 1;
            let mut ring_diff = -local_max_ring_diff;
            while ring_diff <= local_max_ring_diff {
                if ring_diff == local_max_ring_diff || ring_diff + 1 >= next_ring_diff {
                    if weight > 1 {
                        let axial_coord = if seg == 0 {
                            ring_sum
                        } else {
                            ring_sum - (h.segment_span + 1) / 2 - (seg.abs() - 1) * h.segment_span
                        };
                        for view in 0..g.n_views {
                            for tang_coord in -g.tang_coord_offset..-g.tang_coord_offset + h.n_tang_coords {
                                self.weight_bin(seg, view, axial_coord, tang_coord, 1.0 / weight as f32);
                            }
                        }
                    }
                    weight = 1;
                    seg += 1;
                    next_ring_diff += h.segment_span;
                } else {
                    weight += 1;
                }
                ring_diff += 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proj_geom::ProjHeader;

    fn layout() -> ProjLayout {
        ProjLayout::new(ProjHeader {
            n_rings: 2,
            n_crystals_per_ring: 8,
            segment_span: 1,
            n_segments: 3,
            n_tang_coords: 0,
        })
        .unwrap()
    }

    #[test]
    fn set_and_get_bin_round_trips() {
        let mut proj = ProjData::zeros(layout());
        proj.set_bin(1, 0, 0, 0, 7.0);
        assert_eq!(proj.bin(1, 0, 0, 0), 7.0);
        assert_eq!(proj.bin(0, 0, 0, 0), 0.0);
    }

    #[test]
    fn exponential_guards_near_zero() {
        let mut proj = ProjData::zeros(layout());
        proj.set_bin(0, 0, 0, 0, 0.0);
        proj.set_bin(0, 0, 0, 1, 1.0);
        proj.exponential();
        assert_eq!(proj.bin(0, 0, 0, 0), 1.0);
        assert!((proj.bin(0, 0, 0, 1) - std::f32::consts::E).abs() < 1e-5);
    }
}
