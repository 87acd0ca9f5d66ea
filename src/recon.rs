//! The two OSEM iteration drivers: the standard multiplicative update,
//! and a resolution-recovery variant that blurs the current estimate
//! before each subiteration instead of only at `convolution_interval`
//! boundaries.
//!
//! Neither driver writes anything to storage. A caller that wants
//! intermediate volumes on disk passes a `checkpoint` callback, run at
//! `save_interval` subiteration boundaries (never on the final one);
//! the driver itself only ever touches `VolData`.

use log::{info, warn};
use rayon::prelude::*;

use crate::config::OsemConfig;
use crate::error::{PetError, Result};
use crate::geom_types::PathElement;
use crate::lor_cache::LorCache;
use crate::operations;
use crate::proj_data::ProjData;
use crate::scanner::Scanner;
use crate::siddon::Siddon;
use crate::vol::VolData;

fn convolve_flag(config: &OsemConfig) -> bool {
    config.convolution_interval > 0
        && config.fwhm_xyz[0] > 0.0
        && config.fwhm_xyz[1] > 0.0
        && config.fwhm_xyz[2] > 0.0
}

/// Fraction of a subset's sensitivity voxels allowed to sit at or below
/// zero before it's flagged as a likely geometry/masking problem rather
/// than the usual handful of voxels outside the scanner's field of view.
const SENSITIVITY_NOISE_THRESHOLD: f64 = 0.5;

fn warn_if_sensitivity_degenerate(sensitivity_map: &VolData, subset: i32) {
    let n = sensitivity_map.geometry.n_voxels_per_frame;
    let nonpositive = sensitivity_map.count_nonpositive();
    if nonpositive as f64 / n as f64 > SENSITIVITY_NOISE_THRESHOLD {
        warn!("subset {subset}: {nonpositive} of {n} sensitivity voxels are non-positive");
    }
}

fn check_ready(scanner: &Scanner, input_proj: &ProjData, n_subsets: i32) -> Result<()> {
    scanner.check_compatible(
        input_proj.layout.header.n_rings as u32,
        input_proj.layout.header.n_crystals_per_ring as u32,
    )?;
    if n_subsets <= 0 || input_proj.layout.geometry.n_views % n_subsets != 0 {
        return Err(PetError::Config(format!(
            "number of subsets must be a positive divisor of {} views",
            input_proj.layout.geometry.n_views
        )));
    }
    Ok(())
}

/// Looks up the LOR for `index`, traces it if present, and returns the
/// line integral through `read_vol` along the way. Disables the LOR in
/// `cache` on the first iteration if the trace turns out to be empty,
/// so later iterations skip it without retracing.
fn get_line(
    index: usize,
    cache: &LorCache,
    siddon: &Siddon,
    scanner: &Scanner,
    first_iter: bool,
    read_vol: &VolData,
) -> (usize, f64, Vec<PathElement>) {
    let (valid, bin_index, a1, c1, a2, c2) = cache.get_lor(index);
    if !valid {
        return (bin_index, 0.0, Vec::new());
    }

    let path = siddon.compute_path_between_crystals(scanner, a1 as u32, c1 as u32, a2 as u32, c2 as u32);
    let traced = !path[0].is_sentinel();
    if first_iter && !traced {
        warn!("LOR at index {index} never intersects the volume, disabling permanently");
        cache.disable_lor(index);
    }

    let line = if traced { read_vol.compute_line_integral(&path) } else { 0.0 };
    (bin_index, line, path.clone())
}

/// One back-projection sweep over every (subset, segment, bin): adds
/// `bias_proj`'s contribution if present, and back-projects
/// `inputProj / line` into `backProj` wherever the estimated line
/// integral clears the noise floor.
fn back_project_subset(
    input_proj: &ProjData,
    cache: &mut LorCache,
    siddon: &Siddon,
    scanner: &Scanner,
    subset: i32,
    first_iter: bool,
    read_vol: &VolData,
    bias_proj: Option<&ProjData>,
    back_proj: &VolData,
) {
    let g = &input_proj.layout.geometry;
    for seg in -g.seg_offset..=g.seg_offset {
        let n_bins = cache.set_subset_and_segment(subset, seg);
        let cache: &LorCache = cache;

        (0..n_bins).into_par_iter().for_each(|index| {
            let (bin_index, mut line, path) = get_line(index, cache, siddon, scanner, first_iter, read_vol);
            if let Some(bias) = bias_proj {
                line += bias.bin_at(seg, bin_index) as f64;
            }
            if line > crate::geom_types::EPSILON_ARITH {
                back_proj.project_line_integral(&path, input_proj.bin_at(seg, bin_index) as f64 / line);
            }
        });
    }
}

fn maybe_checkpoint(
    subiter: i32,
    n_subiterations: i32,
    config: &OsemConfig,
    output_vol: &VolData,
    checkpoint: &mut Option<&mut dyn FnMut(u32, &VolData)>,
) {
    if config.save_interval > 0
        && subiter % config.save_interval == 0
        && subiter != n_subiterations
    {
        if let Some(cb) = checkpoint.as_mut() {
            cb(subiter as u32, output_vol);
        }
    }
}

/// Standard OSEM: each subiteration back-projects the current
/// estimate's residual, divides by the per-subset sensitivity, and
/// multiplies the running estimate by the result.
#[allow(clippy::too_many_arguments)]
pub fn osem(
    input_proj: &ProjData,
    scanner: &Scanner,
    output_vol: &mut VolData,
    config: &OsemConfig,
    sensitivity_map: &mut VolData,
    bias_proj: Option<&ProjData>,
    mut checkpoint: Option<&mut dyn FnMut(u32, &VolData)>,
) -> Result<()> {
    info!("osem:");
    check_ready(scanner, input_proj, config.n_subsets)?;

    let convolve_flag = convolve_flag(config);

    let back_proj = VolData::allocate_as_multi_frame(&output_vol.header, 1)?;
    let mut cache = LorCache::new(&input_proj.layout, config.n_subsets)?;
    let siddon = Siddon::new(&output_vol.header);

    operations::cut_circle(output_vol, config.cut_radius);

    let n_subiterations = config.n_iterations * config.n_subsets;

    for iter in 0..config.n_iterations {
        info!("iteration {} of {}", iter + 1, config.n_iterations);

        for subset in 0..config.n_subsets {
            let subiter = iter * config.n_subsets + subset + 1;
            if config.n_subsets > 1 {
                info!("  sub-iteration {} of {}", subset + 1, config.n_subsets);
            }

            back_project_subset(
                input_proj,
                &mut cache,
                &siddon,
                scanner,
                subset,
                iter == 0,
                output_vol,
                bias_proj,
                &back_proj,
            );

            sensitivity_map.set_active_frame(subset as usize)?;
            warn_if_sensitivity_degenerate(sensitivity_map, subset);
            back_proj.div_assign_guarded(sensitivity_map)?;
            output_vol.mul_assign_guarded(&back_proj)?;

            if convolve_flag && subiter % config.convolution_interval == 0 {
                operations::convolve(output_vol, config.fwhm_xyz, config.cut_radius)?;
            }
            operations::cut_circle(output_vol, config.cut_radius);

            if subiter != n_subiterations {
                back_proj.set_all_voxels(0.0);
            }

            maybe_checkpoint(subiter, n_subiterations, config, output_vol, &mut checkpoint);
        }
    }

    Ok(())
}

/// Resolution-recovery OSEM: the sensitivity map and the
/// back-projection are themselves blurred each subiteration, and the
/// running estimate is divided by sensitivity directly rather than
/// through `backProj`, so the blur that feeds the next subiteration's
/// forward model tracks the output volume rather than a once-per-
/// `convolution_interval` snapshot of it.
#[allow(clippy::too_many_arguments)]
pub fn osem_reso_reco(
    input_proj: &ProjData,
    scanner: &Scanner,
    output_vol: &mut VolData,
    config: &OsemConfig,
    sensitivity_map: &mut VolData,
    bias_proj: Option<&ProjData>,
    mut checkpoint: Option<&mut dyn FnMut(u32, &VolData)>,
) -> Result<()> {
    info!("osem_reso_reco:");
    check_ready(scanner, input_proj, config.n_subsets)?;

    let convolve_flag = convolve_flag(config);

    let mut cache = LorCache::new(&input_proj.layout, config.n_subsets)?;
    let siddon = Siddon::new(&output_vol.header);
    let mut back_proj = VolData::allocate_as_multi_frame(&output_vol.header, 1)?;

    operations::cut_circle(output_vol, config.cut_radius);

    for subset in 0..config.n_subsets {
        sensitivity_map.set_active_frame(subset as usize)?;
        operations::convolve(sensitivity_map, config.fwhm_xyz, config.cut_radius)?;
    }

    let mut blur = VolData::allocate_as_multi_frame(&output_vol.header, 1)?;
    blur.assign_frame(output_vol)?;

    let n_subiterations = config.n_iterations * config.n_subsets;

    for iter in 0..config.n_iterations {
        info!("iteration {} of {}", iter + 1, config.n_iterations);

        for subset in 0..config.n_subsets {
            let subiter = iter * config.n_subsets + subset + 1;
            if config.n_subsets > 1 {
                info!("  sub-iteration {} of {}", subset + 1, config.n_subsets);
            }

            operations::convolve(&mut blur, config.fwhm_xyz, config.cut_radius)?;

            back_project_subset(
                input_proj,
                &mut cache,
                &siddon,
                scanner,
                subset,
                iter == 0,
                output_vol,
                bias_proj,
                &back_proj,
            );

            operations::convolve(&mut back_proj, config.fwhm_xyz, config.cut_radius)?;

            sensitivity_map.set_active_frame(subset as usize)?;
            warn_if_sensitivity_degenerate(sensitivity_map, subset);
            output_vol.div_assign_guarded(sensitivity_map)?;
            output_vol.mul_assign_guarded(&back_proj)?;

            if subiter != n_subiterations {
                back_proj.set_all_voxels(0.0);
            }

            if convolve_flag && subiter % config.convolution_interval == 0 {
                operations::convolve(output_vol, config.fwhm_xyz, config.cut_radius)?;
            }
            operations::cut_circle(output_vol, config.cut_radius);

            if subiter != n_subiterations {
                blur.assign_frame(output_vol)?;
            }

            maybe_checkpoint(subiter, n_subiterations, config, output_vol, &mut checkpoint);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom_types::{VolOffset, VolSize, VoxelExtent};
    use crate::proj_geom::ProjHeader;
    use crate::proj_geom::ProjLayout;
    use crate::projectors;
    use crate::scanner::{Scanner, ScannerHeader};
    use crate::vol::VolHeader;

    fn scanner() -> Scanner {
        Scanner::new(ScannerHeader {
            crystal_dims_xyz: [4.0, 4.0, 4.0],
            crystal_repeat_yz: [16, 4],
            inter_crystal_distance_yz: [0.0, 0.0],
            module_dims_xyz: [0.0, 0.0, 0.0],
            module_repeat_yz: [1, 1],
            inter_module_distance_yz: [0.0, 0.0],
            rsector_dims_xyz: [0.0, 0.0, 0.0],
            rsector_repeat_number: 1,
            rsector_inner_radius: 100.0,
        })
        .unwrap()
    }

    fn vol_header(n_frames: usize) -> VolHeader {
        VolHeader {
            vol_size: VolSize::new(9, 9, 4),
            voxel_extent: VoxelExtent::new(5.0, 5.0, 5.0),
            vol_offset: VolOffset::new(0.0, 0.0, 0.0),
            n_frames,
        }
    }

    fn proj_layout() -> ProjLayout {
        ProjLayout::new(ProjHeader {
            n_rings: 4,
            n_crystals_per_ring: 16,
            segment_span: 1,
            n_segments: 1,
            n_tang_coords: 0,
        })
        .unwrap()
    }

    /// A ground-truth volume is a fixed point of the OSEM update: if
    /// the current estimate already matches the data exactly, the
    /// measured/estimated ratio is 1 along every traced LOR, so
    /// `backProj` back-projects to exactly the sensitivity map and the
    /// update leaves every covered voxel unchanged.
    #[test]
    fn ground_truth_volume_is_an_osem_fixed_point() {
        let scanner = scanner();
        let layout = proj_layout();

        let true_vol = VolData::allocate(vol_header(1), 0.0).unwrap();
        for i in 3..6 {
            for j in 3..6 {
                for k in 0..4 {
                    true_vol.set_voxel(i, j, k, 2.0);
                }
            }
        }

        let mut measured = ProjData::zeros(layout.clone());
        projectors::forward(&true_vol, &scanner, &mut measured).unwrap();

        let mut sensitivity = VolData::allocate_as_multi_frame(&vol_header(1), 1).unwrap();
        projectors::compute_sensitivity_vol(&layout, &scanner, &mut sensitivity, 1).unwrap();

        let mut output_vol = VolData::allocate(vol_header(1), 0.0).unwrap();
        output_vol.assign_frame(&true_vol).unwrap();

        let config = OsemConfig {
            n_iterations: 1,
            n_subsets: 1,
            ..OsemConfig::default()
        };

        osem(&measured, &scanner, &mut output_vol, &config, &mut sensitivity, None, None).unwrap();

        sensitivity.set_active_frame(0).unwrap();
        for i in 3..6 {
            for j in 3..6 {
                for k in 0..4 {
                    if sensitivity.get_voxel(i, j, k) > 0.0 {
                        let v = output_vol.get_voxel(i, j, k);
                        assert!((v - 2.0).abs() < 1e-2, "got {v} at {i},{j},{k}");
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_subset_count_not_dividing_views() {
        let scanner = scanner();
        let layout = proj_layout();
        let measured = ProjData::zeros(layout);
        let mut output_vol = VolData::allocate(vol_header(1), 1.0).unwrap();
        let mut sensitivity = VolData::allocate_as_multi_frame(&vol_header(1), 3).unwrap();
        let config = OsemConfig {
            n_iterations: 1,
            n_subsets: 3,
            ..OsemConfig::default()
        };
        assert!(osem(&measured, &scanner, &mut output_vol, &config, &mut sensitivity, None, None).is_err());
    }
}
