//! Volume storage: one contiguous voxel buffer shared by all frames,
//! with atomic accumulation for back-projection.

use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{PetError, Result};
use crate::geom_types::{voxel_index, PathElement, VolOffset, VolSize, VoxelExtent, EPSILON_ARITH};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolHeader {
    pub vol_size: VolSize,
    pub voxel_extent: VoxelExtent,
    pub vol_offset: VolOffset,
    pub n_frames: usize,
}

impl VolHeader {
    pub fn check(&self) -> Result<()> {
        if self.vol_size.nx == 0 || self.vol_size.ny == 0 || self.vol_size.nz == 0 {
            return Err(PetError::Config("volume size must be > 0 on every axis".into()));
        }
        if self.voxel_extent.dx <= 0.0 || self.voxel_extent.dy <= 0.0 || self.voxel_extent.dz <= 0.0
        {
            return Err(PetError::Config(
                "voxel extent must be > 0 on every axis".into(),
            ));
        }
        if self.n_frames == 0 {
            return Err(PetError::Config("number of frames must be >= 1".into()));
        }
        Ok(())
    }

    pub fn with_n_frames(&self, n_frames: usize) -> Self {
        Self {
            n_frames,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolGeometry {
    pub n_voxels_per_frame: usize,
    pub n_voxels_total: usize,
}

impl VolGeometry {
    pub fn fill(header: &VolHeader) -> Self {
        let n_voxels_per_frame = header.vol_size.n_voxels();
        Self {
            n_voxels_per_frame,
            n_voxels_total: n_voxels_per_frame * header.n_frames,
        }
    }
}

/// The voxel buffer and active-frame cursor.
///
/// Per the design note on hidden active-frame state, every operation
/// here is also reachable through an explicit-frame-index form
/// (`*_frame` variants) so callers can avoid the mutable cursor
/// entirely; the cursor form is kept because the OSEM drivers rely on
/// it directly (`setActiveFrame` then a sequence of single-frame ops).
pub struct VolData {
    pub header: VolHeader,
    pub geometry: VolGeometry,
    active_frame: usize,
    data: Vec<AtomicU32>,
}

impl VolData {
    pub fn allocate(header: VolHeader, fill: f32) -> Result<Self> {
        header.check()?;
        let geometry = VolGeometry::fill(&header);
        let data = (0..geometry.n_voxels_total)
            .map(|_| AtomicU32::new(fill.to_bits()))
            .collect();
        Ok(Self {
            header,
            geometry,
            active_frame: 0,
            data,
        })
    }

    pub fn allocate_as_multi_frame(template: &VolHeader, n_frames: usize) -> Result<Self> {
        if n_frames == 0 {
            return Err(PetError::Config(
                "number of frames must be > 0".into(),
            ));
        }
        Self::allocate(template.with_n_frames(n_frames), 0.0)
    }

    pub fn active_frame(&self) -> usize {
        self.active_frame
    }

    pub fn set_active_frame(&mut self, frame: usize) -> Result<()> {
        if frame >= self.header.n_frames {
            return Err(PetError::Config(format!(
                "invalid frame {frame} (volume has {} frames)",
                self.header.n_frames
            )));
        }
        self.active_frame = frame;
        Ok(())
    }

    fn frame_offset(&self, frame: usize) -> usize {
        frame * self.geometry.n_voxels_per_frame
    }

    fn active_offset(&self) -> usize {
        self.frame_offset(self.active_frame)
    }

    fn load(&self, idx: usize) -> f32 {
        f32::from_bits(self.data[idx].load(Ordering::Relaxed))
    }

    fn store(&self, idx: usize, value: f32) {
        self.data[idx].store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get_voxel(&self, i: usize, j: usize, k: usize) -> f32 {
        self.load(self.active_offset() + voxel_index(self.header.vol_size, i, j, k))
    }

    pub fn set_voxel(&self, i: usize, j: usize, k: usize, value: f32) {
        self.store(self.active_offset() + voxel_index(self.header.vol_size, i, j, k), value);
    }

    pub fn set_all_voxels(&self, value: f32) {
        let offset = self.active_offset();
        self.data[offset..offset + self.geometry.n_voxels_per_frame]
            .par_iter()
            .for_each(|v| v.store(value.to_bits(), Ordering::Relaxed));
    }

    pub fn set_all_voxels_all_frames(&self, value: f32) {
        self.data
            .par_iter()
            .for_each(|v| v.store(value.to_bits(), Ordering::Relaxed));
    }

    pub fn check_same_layout(&self, other: &VolData) -> Result<()> {
        if self.header.vol_size != other.header.vol_size {
            return Err(PetError::VolumeMismatch(
                "volume sizes do not match".into(),
            ));
        }
        Ok(())
    }

    /// `self *= other` on the active frame of each, epsilon-guarded.
    pub fn mul_assign_guarded(&self, other: &VolData) -> Result<()> {
        self.check_same_layout(other)?;
        let a_off = self.active_offset();
        let b_off = other.active_offset();
        (0..self.geometry.n_voxels_per_frame)
            .into_par_iter()
            .for_each(|i| {
                let a = self.load(a_off + i);
                let b = other.load(b_off + i);
                if a > EPSILON_ARITH as f32 && b > EPSILON_ARITH as f32 {
                    self.store(a_off + i, a * b);
                } else {
                    self.store(a_off + i, 0.0);
                }
            });
        Ok(())
    }

    /// `self /= other` on the active frame of each, epsilon-guarded.
    pub fn div_assign_guarded(&self, other: &VolData) -> Result<()> {
        self.check_same_layout(other)?;
        let a_off = self.active_offset();
        let b_off = other.active_offset();
        (0..self.geometry.n_voxels_per_frame)
            .into_par_iter()
            .for_each(|i| {
                let a = self.load(a_off + i);
                let b = other.load(b_off + i);
                if a > EPSILON_ARITH as f32 && b > EPSILON_ARITH as f32 {
                    self.store(a_off + i, a / b);
                } else {
                    self.store(a_off + i, 0.0);
                }
            });
        Ok(())
    }

    pub fn compute_line_integral(&self, path: &[PathElement]) -> f64 {
        let offset = self.active_offset();
        let mut line = 0.0;
        for element in path {
            if element.is_sentinel() {
                break;
            }
            line += element.length * self.load(offset + element.coord as usize) as f64;
        }
        line
    }

    /// Atomically accumulates `length * line` into each voxel along
    /// `path`, on the active frame.
    pub fn project_line_integral(&self, path: &[PathElement], line: f64) {
        let offset = self.active_offset();
        for element in path {
            if element.is_sentinel() {
                break;
            }
            let idx = offset + element.coord as usize;
            let delta = (element.length * line) as f32;
            let mut current = self.data[idx].load(Ordering::Relaxed);
            loop {
                let updated = (f32::from_bits(current) + delta).to_bits();
                match self.data[idx].compare_exchange_weak(
                    current,
                    updated,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(prev) => current = prev,
                }
            }
        }
    }

    /// Number of voxels at or below zero in the active frame.
    pub fn count_nonpositive(&self) -> usize {
        let offset = self.active_offset();
        (0..self.geometry.n_voxels_per_frame)
            .filter(|&i| self.load(offset + i) <= 0.0)
            .count()
    }

    /// Copies voxel data from `other`'s active frame into `self`'s.
    pub fn assign_frame(&self, other: &VolData) -> Result<()> {
        self.check_same_layout(other)?;
        let a_off = self.active_offset();
        let b_off = other.active_offset();
        (0..self.geometry.n_voxels_per_frame)
            .into_par_iter()
            .for_each(|i| self.store(a_off + i, other.load(b_off + i)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> VolHeader {
        VolHeader {
            vol_size: VolSize::new(3, 3, 2),
            voxel_extent: VoxelExtent::new(1.0, 2.0, 3.0),
            vol_offset: VolOffset::new(0.0, 0.0, 0.0),
            n_frames: 1,
        }
    }

    #[test]
    fn check_rejects_zero_size_and_nonpositive_extent() {
        let mut bad = header();
        bad.vol_size = VolSize::new(0, 3, 2);
        assert!(bad.check().is_err());

        let mut bad = header();
        bad.voxel_extent = VoxelExtent::new(1.0, 0.0, 3.0);
        assert!(bad.check().is_err());

        let mut bad = header();
        bad.voxel_extent = VoxelExtent::new(1.0, -2.0, 3.0);
        assert!(bad.check().is_err());
    }

    #[test]
    fn set_get_voxel_round_trips() {
        let vol = VolData::allocate(header(), 0.0).unwrap();
        vol.set_voxel(1, 2, 0, 5.0);
        assert_eq!(vol.get_voxel(1, 2, 0), 5.0);
    }

    #[test]
    fn count_nonpositive_counts_zero_and_negative_voxels() {
        let vol = VolData::allocate(header(), 1.0).unwrap();
        vol.set_voxel(0, 0, 0, 0.0);
        vol.set_voxel(1, 0, 0, -1.0);
        assert_eq!(vol.count_nonpositive(), 2);
    }

    #[test]
    fn multiply_guards_near_zero() {
        let a = VolData::allocate(header(), 2.0).unwrap();
        let b = VolData::allocate(header(), 0.0).unwrap();
        a.mul_assign_guarded(&b).unwrap();
        assert_eq!(a.get_voxel(0, 0, 0), 0.0);
    }

    #[test]
    fn line_integral_and_atomic_project() {
        let vol = VolData::allocate(header(), 1.0).unwrap();
        let path = [
            PathElement { coord: 0, length: 1.0 },
            PathElement { coord: 1, length: 2.0 },
            PathElement::SENTINEL,
        ];
        assert_eq!(vol.compute_line_integral(&path), 3.0);

        vol.project_line_integral(&path, 2.0);
        assert_eq!(vol.get_voxel(0, 0, 0), 1.0 + 1.0 * 2.0);
        assert_eq!(vol.get_voxel(1, 0, 0), 1.0 + 2.0 * 2.0);
    }

    #[test]
    fn active_frame_switch_targets_right_slice() {
        let mut vol = VolData::allocate(header().with_n_frames(2), 0.0).unwrap();
        vol.set_voxel(0, 0, 0, 1.0);
        vol.set_active_frame(1).unwrap();
        vol.set_voxel(0, 0, 0, 9.0);
        vol.set_active_frame(0).unwrap();
        assert_eq!(vol.get_voxel(0, 0, 0), 1.0);
        vol.set_active_frame(1).unwrap();
        assert_eq!(vol.get_voxel(0, 0, 0), 9.0);
    }
}
