//! Post-processing operators on a reconstructed volume: separable
//! Gaussian smoothing, cylindrical field-of-view masking, arbitrary
//! masking and the Hounsfield-to-attenuation-coefficient mapping.

use rayon::prelude::*;

use crate::error::Result;
use crate::vol::VolData;

const FWHM_TO_SIGMA: f64 = 2.3548;

fn ijk_from_linear(nx: usize, ny: usize, idx: usize) -> (usize, usize, usize) {
    let i = idx % nx;
    let j = (idx / nx) % ny;
    let k = idx / (nx * ny);
    (i, j, k)
}

fn gaussian_kernel(fwhm: f64, voxel_extent: f64) -> (i64, Vec<f64>) {
    let sigma = fwhm / FWHM_TO_SIGMA;
    let half = ((6.0 * sigma / voxel_extent) as i64 + 1) / 2;
    let kernel = (-half..=half)
        .map(|k| (-(k * k) as f64 * voxel_extent * voxel_extent / (2.0 * sigma * sigma)).exp())
        .collect();
    (half, kernel)
}

/// Separable 3-D Gaussian blur with FWHM `fwhm_xyz` (mm); a no-op
/// unless all three components are positive. When `cut_radius > 0`,
/// voxels outside `cut_radius - 5*max(fwhmX, fwhmY)` from the central
/// axis are restored to their pre-blur value, to suppress the ringing
/// a hard cylindrical cut would otherwise introduce near the edge.
pub fn convolve(vol: &mut VolData, fwhm_xyz: [f64; 3], cut_radius: f64) -> Result<()> {
    if !(fwhm_xyz[0] > 0.0 && fwhm_xyz[1] > 0.0 && fwhm_xyz[2] > 0.0) {
        return Ok(());
    }

    let header = vol.header;
    let size = header.vol_size;
    let extent = header.voxel_extent;

    let (half_x, kernel_x) = gaussian_kernel(fwhm_xyz[0], extent.dx);
    let (half_y, kernel_y) = gaussian_kernel(fwhm_xyz[1], extent.dy);
    let (half_z, kernel_z) = gaussian_kernel(fwhm_xyz[2], extent.dz);

    let mut copy_vol = VolData::allocate_as_multi_frame(&header, 1)?;
    let mut image1 = VolData::allocate_as_multi_frame(&header, 1)?;
    let mut image2 = VolData::allocate_as_multi_frame(&header, 1)?;

    for frame in 0..header.n_frames {
        vol.set_active_frame(frame)?;
        copy_vol.assign_frame(vol)?;

        (0..size.nx * size.ny * size.nz)
            .into_par_iter()
            .for_each(|idx| {
                let (i, j, k) = ijk_from_linear(size.nx, size.ny, idx);
                let mut sum = 0.0;
                let mut norm = 0.0;
                for (ki, &kv) in (-half_x..=half_x).zip(kernel_x.iter()) {
                    let ii = i as i64 + ki;
                    if ii >= 0 && (ii as usize) < size.nx {
                        sum += kv * vol.get_voxel(ii as usize, j, k) as f64;
                        norm += kv;
                    }
                }
                if norm > 0.0 {
                    image1.set_voxel(i, j, k, (sum / norm) as f32);
                }
            });

        (0..size.nx * size.ny * size.nz)
            .into_par_iter()
            .for_each(|idx| {
                let (i, j, k) = ijk_from_linear(size.nx, size.ny, idx);
                let mut sum = 0.0;
                let mut norm = 0.0;
                for (ki, &kv) in (-half_y..=half_y).zip(kernel_y.iter()) {
                    let jj = j as i64 + ki;
                    if jj >= 0 && (jj as usize) < size.ny {
                        sum += kv * image1.get_voxel(i, jj as usize, k) as f64;
                        norm += kv;
                    }
                }
                if norm > 0.0 {
                    image2.set_voxel(i, j, k, (sum / norm) as f32);
                }
            });

        (0..size.nx * size.ny * size.nz)
            .into_par_iter()
            .for_each(|idx| {
                let (i, j, k) = ijk_from_linear(size.nx, size.ny, idx);
                let mut sum = 0.0;
                let mut norm = 0.0;
                for (ki, &kv) in (-half_z..=half_z).zip(kernel_z.iter()) {
                    let kk = k as i64 + ki;
                    if kk >= 0 && (kk as usize) < size.nz {
                        sum += kv * image2.get_voxel(i, j, kk as usize) as f64;
                        norm += kv;
                    }
                }
                if norm > 0.0 {
                    vol.set_voxel(i, j, k, (sum / norm) as f32);
                }
            });

        if cut_radius > 0.0 {
            let fwhm = fwhm_xyz[0].max(fwhm_xyz[1]);
            let slice_width = size.nx as f64 * extent.dx;
            let slice_height = size.ny as f64 * extent.dy;
            let threshold = cut_radius - 5.0 * fwhm;

            (0..size.nx * size.ny * size.nz)
                .into_par_iter()
                .for_each(|idx| {
                    let (i, j, k) = ijk_from_linear(size.nx, size.ny, idx);
                    let px = i as f64 * extent.dx + extent.dx / 2.0 - slice_width / 2.0;
                    let py = j as f64 * extent.dy + extent.dy / 2.0 - slice_height / 2.0;
                    if (px * px + py * py).sqrt() >= threshold {
                        vol.set_voxel(i, j, k, copy_vol.get_voxel(i, j, k));
                    }
                });
        }
    }

    Ok(())
}

/// Zeroes every voxel of the active frame farther than `cut_radius`
/// from the volume's central axis. A no-op when `cut_radius <= 0`.
pub fn cut_circle(vol: &VolData, cut_radius: f64) {
    if cut_radius <= 0.0 {
        return;
    }
    let header = vol.header;
    let size = header.vol_size;
    let extent = header.voxel_extent;
    let slice_width = size.nx as f64 * extent.dx;
    let slice_height = size.ny as f64 * extent.dy;

    (0..size.nx * size.ny * size.nz)
        .into_par_iter()
        .for_each(|idx| {
            let (i, j, k) = ijk_from_linear(size.nx, size.ny, idx);
            let px = i as f64 * extent.dx + extent.dx / 2.0 - slice_width / 2.0;
            let py = j as f64 * extent.dy + extent.dy / 2.0 - slice_height / 2.0;
            if (px * px + py * py).sqrt() > cut_radius {
                vol.set_voxel(i, j, k, 0.0);
            }
        });
}

/// Zeroes every active-frame voxel where the corresponding
/// `mask`'s active-frame voxel is `<= 0`.
pub fn apply_mask(vol: &VolData, mask: &VolData) -> Result<()> {
    vol.check_same_layout(mask)?;
    let size = vol.header.vol_size;

    (0..size.nx * size.ny * size.nz)
        .into_par_iter()
        .for_each(|idx| {
            let (i, j, k) = ijk_from_linear(size.nx, size.ny, idx);
            if mask.get_voxel(i, j, k) <= 0.0 {
                vol.set_voxel(i, j, k, 0.0);
            }
        });
    Ok(())
}

/// Bi-linear Hounsfield-unit to linear attenuation coefficient (mm⁻¹)
/// mapping, applied in place to the active frame: HU <= -1000 -> 0;
/// HU in (-1000, 0] -> scaled linearly to [0, 0.0096]; HU > 0 ->
/// 0.0096 plus a shallower slope reaching 0.015 at HU = 1000,
/// continuing at that slope beyond.
pub fn hounsfield_to_mu(vol: &VolData) {
    const WATER_MU: f32 = 0.0096;
    const THOUSAND_MU: f32 = 0.015;
    let scale1 = WATER_MU / 1000.0;
    let scale2 = (THOUSAND_MU - WATER_MU) / 1000.0;

    let size = vol.header.vol_size;
    (0..size.nx * size.ny * size.nz)
        .into_par_iter()
        .for_each(|idx| {
            let (i, j, k) = ijk_from_linear(size.nx, size.ny, idx);
            let hu = vol.get_voxel(i, j, k);
            let mu = if hu <= -1000.0 {
                0.0
            } else if hu <= 0.0 {
                hu * scale1 + WATER_MU
            } else {
                hu * scale2 + WATER_MU
            };
            vol.set_voxel(i, j, k, mu);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom_types::{VolOffset, VolSize, VoxelExtent};
    use crate::vol::VolHeader;

    fn header() -> VolHeader {
        VolHeader {
            vol_size: VolSize::new(5, 5, 3),
            voxel_extent: VoxelExtent::new(2.0, 2.0, 2.0),
            vol_offset: VolOffset::new(0.0, 0.0, 0.0),
            n_frames: 1,
        }
    }

    #[test]
    fn cut_circle_zeroes_outside_radius() {
        let vol = VolData::allocate(header(), 1.0).unwrap();
        cut_circle(&vol, 3.0);
        assert_eq!(vol.get_voxel(2, 2, 0), 1.0);
        assert_eq!(vol.get_voxel(0, 0, 0), 0.0);
    }

    #[test]
    fn mask_zeroes_where_mask_nonpositive() {
        let vol = VolData::allocate(header(), 5.0).unwrap();
        let mask = VolData::allocate(header(), 0.0).unwrap();
        mask.set_voxel(2, 2, 0, 1.0);
        apply_mask(&vol, &mask).unwrap();
        assert_eq!(vol.get_voxel(2, 2, 0), 5.0);
        assert_eq!(vol.get_voxel(0, 0, 0), 0.0);
    }

    #[test]
    fn hounsfield_to_mu_is_continuous_at_breakpoints() {
        let vol = VolData::allocate(header(), 0.0).unwrap();
        vol.set_voxel(0, 0, 0, -1000.0);
        vol.set_voxel(1, 0, 0, 0.0);
        hounsfield_to_mu(&vol);
        assert_eq!(vol.get_voxel(0, 0, 0), 0.0);
        assert!((vol.get_voxel(1, 0, 0) - 0.0096).abs() < 1e-6);
    }
}
