//! Projection header/geometry and the two-way map between bin
//! coordinates (segment, view, axial, tangential) and crystal-pair
//! coordinates, independent of ray tracing.

use crate::error::{PetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjHeader {
    pub n_rings: i32,
    pub n_crystals_per_ring: i32,
    /// Michelogram compression span, odd, defaults to 1.
    pub segment_span: i32,
    /// Number of segments, odd, defaults to 1.
    pub n_segments: i32,
    /// 0 means "use the maximum" (`n_crystals_per_ring - 1`).
    pub n_tang_coords: i32,
}

impl ProjHeader {
    /// Validates the header and resolves `n_tang_coords` if zero,
    /// mirroring `ProjHeader::check`.
    pub fn validate(mut self) -> Result<Self> {
        if self.n_rings <= 0 {
            return Err(PetError::Config("number of rings must be > 0".into()));
        }
        if self.n_crystals_per_ring <= 0 {
            return Err(PetError::Config(
                "number of crystals per ring must be > 0".into(),
            ));
        }
        if self.n_crystals_per_ring % 4 != 0 {
            return Err(PetError::Config(
                "number of crystals per ring must be a multiple of four".into(),
            ));
        }
        if self.segment_span <= 0 || self.segment_span % 2 != 1 {
            return Err(PetError::Config("segment span must be a positive odd number".into()));
        }
        let max_span = 2 * self.n_rings - 1;
        if self.segment_span > max_span {
            return Err(PetError::Config(format!(
                "segment span must not be > {max_span} for {} ring(s)",
                self.n_rings
            )));
        }
        if self.n_segments < 0 || self.n_segments % 2 != 1 {
            return Err(PetError::Config(
                "number of segments must be a nonnegative odd number".into(),
            ));
        }
        let mut max_n_segments = max_span / self.segment_span;
        max_n_segments -= 1 - max_n_segments % 2;
        if self.n_segments > max_n_segments {
            return Err(PetError::Config(format!(
                "number of segments must not be > {max_n_segments} for {} ring(s) and span {}",
                self.n_rings, self.segment_span
            )));
        }
        if self.n_tang_coords < 0 {
            return Err(PetError::Config(
                "number of tangential coordinates must not be negative".into(),
            ));
        }
        let max_n_tang_coords = self.n_crystals_per_ring - 1;
        if self.n_tang_coords == 0 {
            self.n_tang_coords = max_n_tang_coords;
        } else if self.n_tang_coords > max_n_tang_coords {
            return Err(PetError::Config(format!(
                "number of tangential coordinates must not be > {max_n_tang_coords}"
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct ProjGeometry {
    pub n_bins: usize,
    pub seg_offset: i32,
    pub tang_coord_offset: i32,
    pub n_axial_coords: Vec<usize>,
    pub n_views: i32,
    pub half_segment_span: i32,
    pub max_ring_diff: i32,
}

impl ProjGeometry {
    pub fn fill(header: &ProjHeader) -> Self {
        let seg_offset = (header.n_segments - 1) / 2;
        let tang_coord_offset = header.n_tang_coords / 2;

        let mut n_axial_coords = vec![0usize; header.n_segments as usize];
        if header.segment_span == 1 {
            for seg in -seg_offset..=seg_offset {
                n_axial_coords[(seg + seg_offset) as usize] = (header.n_rings - seg.abs()) as usize;
            }
        } else {
            let central_segment_length = 2 * header.n_rings - 1;
            for seg in -seg_offset..=seg_offset {
                let abs_seg = seg.abs();
                let mut segment_length = central_segment_length;
                if abs_seg >= 1 {
                    segment_length -= header.segment_span + 1;
                    if abs_seg >= 2 {
                        segment_length -= 2 * header.segment_span * (abs_seg - 1);
                    }
                }
                n_axial_coords[(seg + seg_offset) as usize] = segment_length as usize;
            }
        }

        let n_views = header.n_crystals_per_ring / 2;

        let n_bins: usize = n_axial_coords
            .iter()
            .map(|&n| n * n_views as usize * header.n_tang_coords as usize)
            .sum();

        let half_segment_span = (header.segment_span - 1) / 2;

        let max_ring_diff = if header.segment_span == 1 {
            seg_offset
        } else if seg_offset > 0 {
            half_segment_span + seg_offset * header.segment_span
        } else {
            half_segment_span
        };

        Self {
            n_bins,
            seg_offset,
            tang_coord_offset,
            n_axial_coords,
            n_views,
            half_segment_span,
            max_ring_diff,
        }
    }

    pub fn n_axial_coords(&self, seg: i32) -> usize {
        self.n_axial_coords[(seg + self.seg_offset) as usize]
    }
}

/// Validated header plus derived geometry; the conversions between
/// bin coordinates and crystal-pair coordinates.
#[derive(Debug, Clone)]
pub struct ProjLayout {
    pub header: ProjHeader,
    pub geometry: ProjGeometry,
}

impl ProjLayout {
    pub fn new(header: ProjHeader) -> Result<Self> {
        let header = header.validate()?;
        let geometry = ProjGeometry::fill(&header);
        Ok(Self { header, geometry })
    }

    /// `crystalAxial(seg, axialCoord) -> (a1, a2)`
    pub fn crystal_axial(&self, seg: i32, axial_coord: i32) -> (i32, i32) {
        let h = &self.header;
        let g = &self.geometry;

        if h.segment_span == 1 {
            return match seg.cmp(&0) {
                std::cmp::Ordering::Equal => (2 * axial_coord, 2 * axial_coord),
                std::cmp::Ordering::Greater => (2 * (axial_coord + seg), 2 * axial_coord),
                std::cmp::Ordering::Less => (2 * axial_coord, 2 * (axial_coord - seg)),
            };
        }

        if seg == 0 {
            return (axial_coord, axial_coord);
        }

        let mid_seg_ring_diff = seg.abs() * h.segment_span;

        if axial_coord < g.half_segment_span {
            let ring_diff = mid_seg_ring_diff - g.half_segment_span + axial_coord;
            return if seg > 0 {
                (2 * ring_diff, 0)
            } else {
                (0, 2 * ring_diff)
            };
        }

        let inverted_axial_coord = g.n_axial_coords(seg) as i32 - axial_coord - 1;

        if inverted_axial_coord < g.half_segment_span {
            let ring_diff = mid_seg_ring_diff - g.half_segment_span + inverted_axial_coord;
            let slice_max = 2 * h.n_rings - 2;
            return if seg > 0 {
                (slice_max, slice_max - 2 * ring_diff)
            } else {
                (slice_max - 2 * ring_diff, slice_max)
            };
        }

        let adjusted_axial_coord = axial_coord - g.half_segment_span;
        if seg > 0 {
            (2 * mid_seg_ring_diff + adjusted_axial_coord, adjusted_axial_coord)
        } else {
            (adjusted_axial_coord, 2 * mid_seg_ring_diff + adjusted_axial_coord)
        }
    }

    /// `crystalAng(view, tangCoord) -> (c1, c2)`
    pub fn crystal_ang(&self, view: i32, tang_coord: i32) -> (i32, i32) {
        let n_crystals = self.header.n_crystals_per_ring;
        let t2 = if tang_coord >= 0 {
            tang_coord / 2
        } else {
            (tang_coord - 1) / 2
        };
        let odd = tang_coord.abs() % 2;

        let mut c1 = view + t2 + odd;
        let mut c2 = view + self.geometry.n_views - t2;

        c1 = c1.rem_euclid(n_crystals);
        c2 = c2.rem_euclid(n_crystals);
        (c1, c2)
    }

    /// `binOf(a1, c1, a2, c2) -> (seg, view, axial, tang)?`
    pub fn bin_of(&self, a1: i32, c1: i32, a2: i32, c2: i32) -> Option<(i32, i32, i32, i32)> {
        let h = &self.header;
        let g = &self.geometry;

        let mut abs_seg = (a1 - a2).abs();
        if abs_seg > g.max_ring_diff {
            return None;
        }

        let sum = c1 + c2;
        let sign1 = if sum >= h.n_crystals_per_ring / 2 && sum < 3 * h.n_crystals_per_ring / 2 {
            -1
        } else {
            1
        };

        let tang_coord = sign1 * ((c2 - c1).abs() - h.n_crystals_per_ring / 2);
        if tang_coord < -g.tang_coord_offset || tang_coord >= -g.tang_coord_offset + h.n_tang_coords {
            return None;
        }

        let axial_coord;
        if h.segment_span == 1 {
            axial_coord = (a1 + a2 - abs_seg) / 2;
        } else {
            let in_central_seg = abs_seg <= g.half_segment_span;
            abs_seg = if in_central_seg {
                0
            } else {
                1 + (abs_seg - g.half_segment_span - 1) / h.segment_span
            };
            let m = if in_central_seg {
                0
            } else {
                1 + g.half_segment_span + (abs_seg - 1) * h.segment_span
            };
            axial_coord = a1 + a2 - m;
        }

        let n = sum + h.n_crystals_per_ring / 2;
        let view = (n.rem_euclid(h.n_crystals_per_ring)) / 2;

        let mut seg = abs_seg;
        if seg != 0 {
            let sign2 = if c1 < c2 { 1 } else { -1 };
            let u = if tang_coord.abs() % 2 == 0 {
                -tang_coord / 2
            } else {
                -(tang_coord - 1) / 2
            };

            let mut bc1 = c1 - sign1 * sign2 * u;
            let mut bc2 = c2 + sign1 * sign2 * u;
            bc1 = bc1.rem_euclid(h.n_crystals_per_ring);
            bc2 = bc2.rem_euclid(h.n_crystals_per_ring);

            let seg_sign = if a1 < a2 { -1 } else { 1 };
            let seg_flip = if bc1 < bc2 { 1 } else { -1 };
            seg *= seg_sign * seg_flip;
        }

        Some((seg, view, axial_coord, tang_coord))
    }
}
