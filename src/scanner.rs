//! Scanner header and the crystal/slice position tables derived from
//! it: crystals are grouped into modules, modules into rSectors, and
//! rSectors are repeated rotationally around the bore.

use nalgebra::{Rotation2, Vector2};
use std::f64::consts::PI;

use crate::error::{PetError, Result};

/// Raw scanner description, as it would be populated once from a
/// scanner parameter file by an external collaborator.
#[derive(Debug, Clone)]
pub struct ScannerHeader {
    pub crystal_dims_xyz: [f64; 3],
    pub crystal_repeat_yz: [u32; 2],
    pub inter_crystal_distance_yz: [f64; 2],

    pub module_dims_xyz: [f64; 3],
    pub module_repeat_yz: [u32; 2],
    pub inter_module_distance_yz: [f64; 2],

    pub rsector_dims_xyz: [f64; 3],
    pub rsector_repeat_number: u32,
    pub rsector_inner_radius: f64,
}

impl ScannerHeader {
    /// Validates the header and fills in the derived defaults for
    /// module/rSector dimensions left at zero (fit tightly on the
    /// contained repeats), returning the resolved header.
    pub fn validate(mut self) -> Result<Self> {
        if self.crystal_dims_xyz.iter().any(|&d| d < 0.0) {
            return Err(PetError::Config(
                "crystal dimensions XYZ must not be negative".into(),
            ));
        }
        if self.crystal_repeat_yz.iter().any(|&n| n == 0) {
            return Err(PetError::Config(
                "crystal repeat numbers YZ must be > 0".into(),
            ));
        }
        if self.inter_crystal_distance_yz.iter().any(|&d| d < 0.0) {
            return Err(PetError::Config(
                "inter-crystal distance YZ must not be negative".into(),
            ));
        }
        if self.module_dims_xyz.iter().any(|&d| d < 0.0) {
            return Err(PetError::Config(
                "module dimensions XYZ must not be negative".into(),
            ));
        }
        if self.module_repeat_yz.iter().any(|&n| n == 0) {
            return Err(PetError::Config(
                "module repeat numbers YZ must be > 0".into(),
            ));
        }
        if self.inter_module_distance_yz.iter().any(|&d| d < 0.0) {
            return Err(PetError::Config(
                "inter-module distance YZ must not be negative".into(),
            ));
        }
        if self.rsector_dims_xyz.iter().any(|&d| d < 0.0) {
            return Err(PetError::Config(
                "rSector dimensions XYZ must not be negative".into(),
            ));
        }
        if self.rsector_repeat_number == 0 {
            return Err(PetError::Config(
                "rSector repeat number must be > 0".into(),
            ));
        }
        if self.rsector_inner_radius <= 0.0 {
            return Err(PetError::Config(
                "rSector inner radius must be > 0".into(),
            ));
        }
        if self.crystal_repeat_yz[0] > 1 && self.crystal_dims_xyz[1] == 0.0 {
            return Err(PetError::Config(
                "crystal repeat number in Y cannot be > 1 if crystal dimension in Y is zero"
                    .into(),
            ));
        }
        if self.crystal_repeat_yz[1] > 1 && self.crystal_dims_xyz[2] == 0.0 {
            return Err(PetError::Config(
                "crystal repeat number in Z cannot be > 1 if crystal dimension in Z is zero"
                    .into(),
            ));
        }

        let min_module_x = self.crystal_dims_xyz[0];
        if self.module_dims_xyz[0] == 0.0 {
            self.module_dims_xyz[0] = min_module_x;
        } else if self.module_dims_xyz[0] < min_module_x {
            return Err(PetError::Config(format!(
                "module dimension in X must be >= {min_module_x}"
            )));
        }

        let min_module_y = self.crystal_dims_xyz[1] * self.crystal_repeat_yz[0] as f64
            + self.inter_crystal_distance_yz[0] * (self.crystal_repeat_yz[0] as f64 - 1.0);
        if self.module_dims_xyz[1] == 0.0 {
            self.module_dims_xyz[1] = min_module_y;
        } else if self.module_dims_xyz[1] < min_module_y {
            return Err(PetError::Config(format!(
                "module dimension in Y must be >= {min_module_y}"
            )));
        }

        let min_module_z = self.crystal_dims_xyz[2] * self.crystal_repeat_yz[1] as f64
            + self.inter_crystal_distance_yz[1] * (self.crystal_repeat_yz[1] as f64 - 1.0);
        if self.module_dims_xyz[2] == 0.0 {
            self.module_dims_xyz[2] = min_module_z;
        } else if self.module_dims_xyz[2] < min_module_z {
            return Err(PetError::Config(format!(
                "module dimension in Z must be >= {min_module_z}"
            )));
        }

        if self.module_repeat_yz[0] > 1 && self.module_dims_xyz[1] == 0.0 {
            return Err(PetError::Config(
                "module repeat number in Y cannot be > 1 if module dimension in Y is zero".into(),
            ));
        }
        if self.module_repeat_yz[1] > 1 && self.module_dims_xyz[2] == 0.0 {
            return Err(PetError::Config(
                "module repeat number in Z cannot be > 1 if module dimension in Z is zero".into(),
            ));
        }

        let min_rsector_x = self.module_dims_xyz[0];
        if self.rsector_dims_xyz[0] == 0.0 {
            self.rsector_dims_xyz[0] = min_rsector_x;
        } else if self.rsector_dims_xyz[0] < min_rsector_x {
            return Err(PetError::Config(format!(
                "rSector dimension in X must be >= {min_rsector_x}"
            )));
        }

        let min_rsector_y = self.module_dims_xyz[1] * self.module_repeat_yz[0] as f64
            + self.inter_module_distance_yz[0] * (self.module_repeat_yz[0] as f64 - 1.0);
        if self.rsector_dims_xyz[1] == 0.0 {
            self.rsector_dims_xyz[1] = min_rsector_y;
        } else if self.rsector_dims_xyz[1] < min_rsector_y {
            return Err(PetError::Config(format!(
                "rSector dimension in Y must be >= {min_rsector_y}"
            )));
        }

        let min_rsector_z = self.module_dims_xyz[2] * self.module_repeat_yz[1] as f64
            + self.inter_module_distance_yz[1] * (self.module_repeat_yz[1] as f64 - 1.0);
        if self.rsector_dims_xyz[2] == 0.0 {
            self.rsector_dims_xyz[2] = min_rsector_z;
        } else if self.rsector_dims_xyz[2] < min_rsector_z {
            return Err(PetError::Config(format!(
                "rSector dimension in Z must be >= {min_rsector_z}"
            )));
        }

        Ok(self)
    }
}

/// Numbers and translation vectors derived from a validated header.
#[derive(Debug, Clone)]
pub struct ScannerGeometry {
    pub crystal_repeat_vector_yz: [f64; 2],
    pub module_repeat_vector_yz: [f64; 2],
    pub rsector_translation_x: f64,

    pub n_rings: u32,
    pub n_crystals_per_ring: u32,
    pub n_crystals: u32,
    pub n_slices: u32,
    pub crystal_offset: u32,
}

impl ScannerGeometry {
    pub fn fill(header: &ScannerHeader) -> Self {
        let crystal_repeat_vector_yz = [
            header.crystal_dims_xyz[1] + header.inter_crystal_distance_yz[0],
            header.crystal_dims_xyz[2] + header.inter_crystal_distance_yz[1],
        ];
        let module_repeat_vector_yz = [
            header.module_dims_xyz[1] + header.inter_module_distance_yz[0],
            header.module_dims_xyz[2] + header.inter_module_distance_yz[1],
        ];
        let rsector_translation_x = header.rsector_inner_radius + header.rsector_dims_xyz[0] / 2.0;

        let n_crystals_per_ring =
            header.crystal_repeat_yz[0] * header.module_repeat_yz[0] * header.rsector_repeat_number;
        let n_rings = header.crystal_repeat_yz[1] * header.module_repeat_yz[1];
        let n_crystals = n_rings * n_crystals_per_ring;
        let n_slices = 2 * n_rings - 1;
        let crystal_offset = header.module_repeat_yz[0] * header.crystal_repeat_yz[0] / 2;

        Self {
            crystal_repeat_vector_yz,
            module_repeat_vector_yz,
            rsector_translation_x,
            n_rings,
            n_crystals_per_ring,
            n_crystals,
            n_slices,
            crystal_offset,
        }
    }
}

/// A validated scanner header plus its derived geometry and the two
/// position tables (`crystal_xy`, `slice_z`) built from it.
#[derive(Debug, Clone)]
pub struct Scanner {
    pub header: ScannerHeader,
    pub geometry: ScannerGeometry,
    crystal_xy: Vec<Vector2<f64>>,
    slice_z: Vec<f64>,
}

impl Scanner {
    pub fn new(header: ScannerHeader) -> Result<Self> {
        let header = header.validate()?;
        let geometry = ScannerGeometry::fill(&header);
        let crystal_xy = compute_crystal_xy(&header, &geometry);
        let slice_z = compute_slice_z(&header, &geometry);
        Ok(Self {
            header,
            geometry,
            crystal_xy,
            slice_z,
        })
    }

    pub fn crystal_xy(&self, crystal: u32) -> Vector2<f64> {
        self.crystal_xy[crystal as usize]
    }

    pub fn slice_z(&self, slice: u32) -> f64 {
        self.slice_z[slice as usize]
    }

    /// Checks that a projection shares the scanner's ring/crystal
    /// counts, matching `ScannerData::checkProjData`.
    pub fn check_compatible(&self, n_rings: u32, n_crystals_per_ring: u32) -> Result<()> {
        if n_rings != self.geometry.n_rings || n_crystals_per_ring != self.geometry.n_crystals_per_ring
        {
            return Err(PetError::Config(format!(
                "projection must have {} rings and {} crystals per ring to match the scanner",
                self.geometry.n_rings, self.geometry.n_crystals_per_ring
            )));
        }
        Ok(())
    }
}

fn compute_crystal_xy(header: &ScannerHeader, geometry: &ScannerGeometry) -> Vec<Vector2<f64>> {
    let n_crystals_y = header.crystal_repeat_yz[0];
    let crystal_repeat_y = geometry.crystal_repeat_vector_yz[0];
    let n_modules_y = header.module_repeat_yz[0];
    let module_repeat_y = geometry.module_repeat_vector_yz[0];

    let first_crystal_y = -((n_modules_y as f64 - 1.0) * module_repeat_y
        + (n_crystals_y as f64 - 1.0) * crystal_repeat_y)
        / 2.0;

    let rsector_n_crystals_y = (n_modules_y * n_crystals_y) as usize;
    let mut rsector_y = vec![0.0_f64; rsector_n_crystals_y];
    for module_index in 0..n_modules_y {
        for crystal_index in 0..n_crystals_y {
            rsector_y[(module_index * n_crystals_y + crystal_index) as usize] =
                module_index as f64 * module_repeat_y
                    + crystal_index as f64 * crystal_repeat_y
                    + first_crystal_y;
        }
    }

    let n_per_ring = geometry.n_crystals_per_ring as usize;
    let mut out = vec![Vector2::new(0.0, 0.0); n_per_ring];
    let angle_interval = 2.0 * PI / header.rsector_repeat_number as f64;
    let first_crystal_index = geometry.n_crystals_per_ring - geometry.crystal_offset;

    for crystal_index in 0..first_crystal_index {
        let x = geometry.rsector_translation_x;
        let crystal_index_with_offset = crystal_index + geometry.crystal_offset;
        let y = rsector_y[(crystal_index_with_offset as usize) % rsector_n_crystals_y];
        let angle = (crystal_index_with_offset as usize / rsector_n_crystals_y) as f64 * angle_interval;
        out[crystal_index as usize] = Rotation2::new(angle) * Vector2::new(x, y);
    }
    for crystal_index in first_crystal_index..geometry.n_crystals_per_ring {
        out[crystal_index as usize] = Vector2::new(
            geometry.rsector_translation_x,
            rsector_y[(crystal_index - first_crystal_index) as usize],
        );
    }

    out
}

fn compute_slice_z(header: &ScannerHeader, geometry: &ScannerGeometry) -> Vec<f64> {
    let n_crystals_z = header.crystal_repeat_yz[1];
    let module_repeat_z = geometry.module_repeat_vector_yz[1];
    let n_modules_z = header.module_repeat_yz[1];
    let crystal_repeat_z = geometry.crystal_repeat_vector_yz[1];

    let first_ring_z = -((n_modules_z as f64 - 1.0) * module_repeat_z
        + (n_crystals_z as f64 - 1.0) * crystal_repeat_z)
        / 2.0;

    let rsector_n_crystals_z = (n_modules_z * n_crystals_z) as usize;
    let mut ring_z = vec![0.0_f64; rsector_n_crystals_z];
    for module_index in 0..n_modules_z {
        for crystal_index in 0..n_crystals_z {
            ring_z[(module_index * n_crystals_z + crystal_index) as usize] =
                module_index as f64 * module_repeat_z
                    + crystal_index as f64 * crystal_repeat_z
                    + first_ring_z;
        }
    }

    let mut slice_z = vec![0.0_f64; geometry.n_slices as usize];
    for slice_index in 0..geometry.n_slices as usize {
        slice_z[slice_index] = if slice_index % 2 == 0 {
            ring_z[slice_index / 2]
        } else {
            (ring_z[slice_index / 2] + ring_z[(slice_index + 1) / 2]) / 2.0
        };
    }
    slice_z
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_header() -> ScannerHeader {
        ScannerHeader {
            crystal_dims_xyz: [4.0, 4.0, 4.0],
            crystal_repeat_yz: [2, 2],
            inter_crystal_distance_yz: [0.0, 0.0],
            module_dims_xyz: [0.0, 0.0, 0.0],
            module_repeat_yz: [1, 1],
            inter_module_distance_yz: [0.0, 0.0],
            rsector_dims_xyz: [0.0, 0.0, 0.0],
            rsector_repeat_number: 4,
            rsector_inner_radius: 100.0,
        }
    }

    #[test]
    fn rejects_missing_rsector_repeat() {
        let mut header = simple_header();
        header.rsector_repeat_number = 0;
        assert!(header.validate().is_err());
    }

    #[test]
    fn crystal_zero_on_positive_x_axis() {
        let scanner = Scanner::new(simple_header()).unwrap();
        let c0 = scanner.crystal_xy(0);
        assert!(c0.x > 0.0);
        assert!(c0.y.abs() < 1e-9);
    }

    #[test]
    fn derived_counts_match_formula() {
        let scanner = Scanner::new(simple_header()).unwrap();
        assert_eq!(scanner.geometry.n_rings, 2);
        assert_eq!(scanner.geometry.n_crystals_per_ring, 8);
        assert_eq!(scanner.geometry.n_slices, 3);
    }

    #[test]
    fn slice_z_interleaves_rings() {
        let scanner = Scanner::new(simple_header()).unwrap();
        let mid = (scanner.slice_z(0) + scanner.slice_z(2)) / 2.0;
        assert!((scanner.slice_z(1) - mid).abs() < 1e-9);
    }
}
