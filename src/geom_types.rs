//! Value types shared by every other module: volume dimensions, voxel
//! extents, 3-D coordinates and Siddon path elements.

/// Geometric epsilon: used to decide whether a line of response runs
/// parallel to a voxel-grid plane along a given axis.
pub const EPSILON_GEOM: f64 = 1e-5;

/// Arithmetic epsilon: used to guard divisions and exponentials
/// against near-zero denominators/arguments. Numerically identical to
/// [`EPSILON_GEOM`] today but conceptually distinct, so kept as a
/// separate constant.
pub const EPSILON_ARITH: f64 = 1e-5;

/// Voxel grid dimensions (number of voxels along each axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolSize {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl VolSize {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    pub fn n_voxels(&self) -> usize {
        self.nx * self.ny * self.nz
    }
}

/// Voxel physical size in millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelExtent {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl VoxelExtent {
    pub fn new(dx: f64, dy: f64, dz: f64) -> Self {
        Self { dx, dy, dz }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.dx,
            Axis::Y => self.dy,
            Axis::Z => self.dz,
        }
    }
}

/// Volume center offset: (x, y) center in mm, and center-to-center z
/// offset (the z position of voxel index 0 along the slice axis, in
/// the projection geometry's slice-indexed convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl VolOffset {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

/// A 3-D point in millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

/// One step of a Siddon path: a linear voxel index and the
/// intersection length (mm) of the LOR with that voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathElement {
    pub coord: i64,
    pub length: f64,
}

impl PathElement {
    /// Sentinel marking the end of a path, mirroring the
    /// `coord == -1` terminator convention.
    pub const SENTINEL: PathElement = PathElement {
        coord: -1,
        length: 0.0,
    };

    pub fn is_sentinel(&self) -> bool {
        self.coord < 0
    }
}

/// Linear voxel index for (i, j, k) within a volume of the given size.
pub fn voxel_index(size: VolSize, i: usize, j: usize, k: usize) -> usize {
    i + j * size.nx + k * size.nx * size.ny
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voxel_index_is_x_fastest() {
        let size = VolSize::new(3, 3, 2);
        assert_eq!(voxel_index(size, 0, 0, 0), 0);
        assert_eq!(voxel_index(size, 1, 0, 0), 1);
        assert_eq!(voxel_index(size, 0, 1, 0), 3);
        assert_eq!(voxel_index(size, 0, 0, 1), 9);
    }

    #[test]
    fn sentinel_detection() {
        assert!(PathElement::SENTINEL.is_sentinel());
        assert!(!PathElement { coord: 0, length: 1.0 }.is_sentinel());
    }
}
