//! Siddon's algorithm: intersects a line of response with the voxel
//! grid, producing a path of (voxel, length) pairs.

use std::sync::{Mutex, MutexGuard};

use crate::geom_types::{PathElement, EPSILON_GEOM};
use crate::scanner::Scanner;
use crate::vol::VolHeader;

const ALPHA_MIN: f64 = 0.0;
const ALPHA_MAX: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct Setup {
    diff: f64,
    dir: i64,
    alpha_min: f64,
    alpha_max: f64,
    next_alpha: f64,
}

/// Per-axis low/high bounding planes and index bookkeeping derived
/// from a volume header, shared by every LOR traced against it.
pub struct Siddon {
    low_planes: [f64; 3],
    high_planes: [f64; 3],
    voxel_extent: [f64; 3],
    vol_size_m1: [i64; 3],
    row_size: i64,
    slice_size: i64,
    max_path_length: usize,
    /// One scratch path buffer per worker thread, keyed by
    /// `rayon::current_thread_index()`; the pool's thread count is
    /// fixed for the run so these are allocated once. A `Mutex` rather
    /// than a bare `RefCell` only because the latter is not `Sync`;
    /// since each thread only ever touches its own slot the lock is
    /// always uncontended.
    buffers: Vec<Mutex<Vec<PathElement>>>,
}

impl Siddon {
    pub fn new(header: &VolHeader) -> Self {
        let size = header.vol_size;
        let extent = header.voxel_extent;
        let offset = header.vol_offset;

        let slice_width = size.nx as f64 * extent.dx;
        let slice_height = size.ny as f64 * extent.dy;
        let vol_depth = size.nz as f64 * extent.dz;

        let low_planes = [
            offset.x - extent.dx / 2.0,
            offset.y - extent.dy / 2.0,
            offset.z - vol_depth / 2.0,
        ];
        let high_planes = [
            low_planes[0] + slice_width,
            low_planes[1] + slice_height,
            low_planes[2] + vol_depth,
        ];

        let max_path_length = size.nx + size.ny + size.nz;
        let n_threads = rayon::current_num_threads().max(1);
        let buffers = (0..n_threads)
            .map(|_| Mutex::new(Vec::with_capacity(max_path_length + 1)))
            .collect();

        Self {
            low_planes,
            high_planes,
            voxel_extent: [extent.dx, extent.dy, extent.dz],
            vol_size_m1: [
                size.nx as i64 - 1,
                size.ny as i64 - 1,
                size.nz as i64 - 1,
            ],
            row_size: size.nx as i64,
            slice_size: (size.nx * size.ny) as i64,
            max_path_length,
            buffers,
        }
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    fn slot(&self) -> &Mutex<Vec<PathElement>> {
        let idx = rayon::current_thread_index().unwrap_or(0) % self.buffers.len();
        &self.buffers[idx]
    }

    /// Looks up the two crystals' positions via `scanner` and traces
    /// the LOR between them.
    pub fn compute_path_between_crystals(
        &self,
        scanner: &Scanner,
        crys_axial1: u32,
        crys_ang1: u32,
        crys_axial2: u32,
        crys_ang2: u32,
    ) -> MutexGuard<'_, Vec<PathElement>> {
        let p1 = scanner.crystal_xy(crys_ang1);
        let p2 = scanner.crystal_xy(crys_ang2);
        let z1 = scanner.slice_z(crys_axial1);
        let z2 = scanner.slice_z(crys_axial2);
        self.compute_path(p1.x, p1.y, z1, p2.x, p2.y, z2)
    }

    /// Traces the LOR from (x1,y1,z1) to (x2,y2,z2) in spatial
    /// coordinates. The returned buffer is sentinel-terminated; an
    /// empty path (the LOR misses the volume) is a single sentinel.
    pub fn compute_path(
        &self,
        crys1_x: f64,
        crys1_y: f64,
        crys1_z: f64,
        crys2_x: f64,
        crys2_y: f64,
        crys2_z: f64,
    ) -> MutexGuard<'_, Vec<PathElement>> {
        let mut buf = self.slot().lock().expect("siddon path buffer poisoned");
        buf.clear();
        self.trace(
            [crys1_x, crys1_y, crys1_z],
            [crys2_x, crys2_y, crys2_z],
            &mut buf,
        );
        buf.push(PathElement::SENTINEL);
        buf
    }

    fn trace(&self, crys1: [f64; 3], crys2: [f64; 3], out: &mut Vec<PathElement>) {
        let setups = [
            dim_setup(crys1[0], crys2[0], self.low_planes[0], self.high_planes[0]),
            dim_setup(crys1[1], crys2[1], self.low_planes[1], self.high_planes[1]),
            dim_setup(crys1[2], crys2[2], self.low_planes[2], self.high_planes[2]),
        ];
        let (setup_x, setup_y, setup_z) = match (setups[0], setups[1], setups[2]) {
            (Some(x), Some(y), Some(z)) => (x, y, z),
            _ => return,
        };

        let alpha_min = setup_x
            .alpha_min
            .max(setup_y.alpha_min)
            .max(setup_z.alpha_min)
            .max(ALPHA_MIN);
        let alpha_max = setup_x
            .alpha_max
            .min(setup_y.alpha_max)
            .min(setup_z.alpha_max)
            .min(ALPHA_MAX);
        if alpha_min >= alpha_max {
            return;
        }

        let setups = [setup_x, setup_y, setup_z];
        let d_alpha = [
            self.voxel_extent[0] / setup_x.diff.abs(),
            self.voxel_extent[1] / setup_y.diff.abs(),
            self.voxel_extent[2] / setup_z.diff.abs(),
        ];

        let d12 = (setup_x.diff * setup_x.diff
            + setup_y.diff * setup_y.diff
            + setup_z.diff * setup_z.diff)
            .sqrt();

        let mut position = [0i64; 3];
        let mut alpha_dim = [0.0f64; 3];
        for axis in 0..3 {
            position[axis] = self.start_index(axis, crys1[axis], setups[axis].diff, alpha_min);
            alpha_dim[axis] = self.prepare_dim(
                axis,
                crys1[axis],
                &setups[axis],
                position[axis],
                d_alpha[axis],
            );
        }

        let mut previous_alpha = alpha_min;
        while previous_alpha < alpha_max {
            let next_alpha = alpha_max.min(alpha_dim[0].min(alpha_dim[1].min(alpha_dim[2])));

            if self.in_bounds(position) {
                out.push(PathElement {
                    coord: self.linear_coord(position),
                    length: (next_alpha - previous_alpha) * d12,
                });
            }

            for axis in 0..3 {
                if (alpha_dim[axis] - next_alpha).abs() < EPSILON_GEOM {
                    alpha_dim[axis] += d_alpha[axis];
                    position[axis] += setups[axis].dir;
                }
            }

            previous_alpha = next_alpha;
        }
    }

    fn start_index(&self, axis: usize, crys1: f64, diff: f64, alpha_min: f64) -> i64 {
        let ind = ((crys1 + diff * alpha_min - self.low_planes[axis]) / self.voxel_extent[axis])
            as i64;
        ind.max(0).min(self.vol_size_m1[axis])
    }

    fn prepare_dim(&self, axis: usize, crys1: f64, setup: &Setup, position: i64, d_alpha: f64) -> f64 {
        let mut alpha = setup.next_alpha;
        if alpha < ALPHA_MAX {
            let len = self.low_planes[axis] + self.voxel_extent[axis] * position as f64 - crys1;
            alpha = len / setup.diff;
        }
        if setup.dir > 0 {
            alpha += d_alpha;
        }
        alpha
    }

    fn in_bounds(&self, position: [i64; 3]) -> bool {
        (0..3).all(|axis| position[axis] >= 0 && position[axis] <= self.vol_size_m1[axis])
    }

    fn linear_coord(&self, position: [i64; 3]) -> i64 {
        voxel_index_from(position, self.row_size, self.slice_size)
    }
}

fn voxel_index_from(position: [i64; 3], row_size: i64, slice_size: i64) -> i64 {
    position[0] + position[1] * row_size + position[2] * slice_size
}

fn dim_setup(crys1: f64, crys2: f64, low_plane: f64, high_plane: f64) -> Option<Setup> {
    let mut diff = crys2 - crys1;

    if diff.abs() > EPSILON_GEOM {
        let (dir, alpha_min, alpha_max) = if diff > 0.0 {
            (1, (low_plane - crys1) / diff, (high_plane - crys1) / diff)
        } else {
            (-1, (high_plane - crys1) / diff, (low_plane - crys1) / diff)
        };
        Some(Setup {
            diff,
            dir,
            alpha_min,
            alpha_max,
            next_alpha: ALPHA_MIN,
        })
    } else {
        if crys1 < low_plane || crys1 > high_plane {
            return None;
        }
        diff = EPSILON_GEOM;
        Some(Setup {
            diff,
            dir: -1,
            alpha_min: ALPHA_MIN,
            alpha_max: ALPHA_MAX,
            next_alpha: ALPHA_MAX,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom_types::{VolOffset, VolSize, VoxelExtent};

    fn header() -> VolHeader {
        let vol_size = VolSize::new(3, 3, 2);
        let voxel_extent = VoxelExtent::new(1.0, 2.0, 3.0);
        VolHeader {
            vol_size,
            voxel_extent,
            vol_offset: VolOffset::new(
                -(vol_size.nx as f64 - 1.0) * voxel_extent.dx / 2.0,
                -(vol_size.ny as f64 - 1.0) * voxel_extent.dy / 2.0,
                0.0,
            ),
            n_frames: 1,
        }
    }

    fn assert_path(path: &[PathElement], expected: &[(i64, f64)]) {
        let mut actual = vec![];
        for element in path {
            if element.is_sentinel() {
                break;
            }
            actual.push((element.coord, element.length));
        }
        assert_eq!(actual.len(), expected.len());
        for ((coord, length), (exp_coord, exp_length)) in actual.iter().zip(expected.iter()) {
            assert_eq!(coord, exp_coord);
            assert!((length - exp_length).abs() < 1e-7);
        }
    }

    #[test]
    fn s1_orthogonal_path() {
        let siddon = Siddon::new(&header());
        let path = siddon.compute_path(-1.5, -2.0, -1.5, 1.5, -2.0, -1.5);
        assert_path(&path, &[(0, 1.0), (1, 1.0), (2, 1.0)]);
    }

    #[test]
    fn s2_vertical_path() {
        let siddon = Siddon::new(&header());
        let path = siddon.compute_path(-1.0, -3.0, -1.5, -1.0, 3.0, -1.5);
        assert_path(&path, &[(0, 2.0), (3, 2.0), (6, 2.0)]);
    }

    #[test]
    fn s3_axial_path() {
        let siddon = Siddon::new(&header());
        let path = siddon.compute_path(-1.0, -2.0, -4.5, -1.0, -2.0, 4.5);
        assert_path(&path, &[(0, 3.0), (9, 3.0)]);
    }

    #[test]
    fn s4_reversed_from_inside() {
        let siddon = Siddon::new(&header());
        let path = siddon.compute_path(0.0, -2.0, -1.5, -2.5, -2.0, -1.5);
        assert_path(&path, &[(1, 0.5), (0, 1.0)]);
    }

    #[test]
    fn lor_missing_volume_is_empty() {
        let siddon = Siddon::new(&header());
        let path = siddon.compute_path(-1.5, -2.0, 100.0, 1.5, -2.0, 100.0);
        assert!(path[0].is_sentinel());
    }
}
