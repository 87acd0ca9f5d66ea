//! Forward and backward projection, and the sensitivity volume they
//! are built from.

use log::{debug, info};
use rayon::prelude::*;

use crate::error::{PetError, Result};
use crate::lor_cache::LorCache;
use crate::proj_data::ProjData;
use crate::proj_geom::ProjLayout;
use crate::scanner::Scanner;
use crate::siddon::Siddon;
use crate::vol::VolData;

fn check_compatible(scanner: &Scanner, layout: &ProjLayout) -> Result<()> {
    scanner.check_compatible(
        layout.header.n_rings as u32,
        layout.header.n_crystals_per_ring as u32,
    )
}

/// Traces every bin of `output_proj` against `input_vol`. Segments run
/// sequentially (so progress is observable); within a segment, views
/// run in parallel.
pub fn forward(input_vol: &VolData, scanner: &Scanner, output_proj: &mut ProjData) -> Result<()> {
    check_compatible(scanner, &output_proj.layout)?;

    let siddon = Siddon::new(&input_vol.header);
    let layout = output_proj.layout.clone();
    let g = &layout.geometry;

    for seg in -g.seg_offset..=g.seg_offset {
        info!("forward projection: segment {seg}");
        let n_axial = g.n_axial_coords(seg) as i32;
        let n_tang = layout.header.n_tang_coords;
        let chunk_len = (n_axial * n_tang) as usize;

        output_proj
            .segment_mut(seg)
            .par_chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(view, chunk)| {
                let view = view as i32;
                for axial_coord in 0..n_axial {
                    let (a1, a2) = layout.crystal_axial(seg, axial_coord);
                    for tang_coord in -g.tang_coord_offset..-g.tang_coord_offset + n_tang {
                        let (c1, c2) = layout.crystal_ang(view, tang_coord);
                        let path = siddon.compute_path_between_crystals(
                            scanner,
                            a1 as u32,
                            c1 as u32,
                            a2 as u32,
                            c2 as u32,
                        );
                        let line = input_vol.compute_line_integral(&path);

                        let local = (axial_coord * n_tang + (tang_coord + g.tang_coord_offset))
                            as usize;
                        chunk[local] = line as f32;
                    }
                }
            });
    }

    Ok(())
}

/// Back-projects `input_proj` into `output_vol`, one subset per frame.
/// `output_vol` must already be allocated with exactly `n_subsets`
/// frames.
pub fn backward(
    input_proj: &ProjData,
    scanner: &Scanner,
    output_vol: &mut VolData,
    n_subsets: i32,
) -> Result<()> {
    check_compatible(scanner, &input_proj.layout)?;
    if output_vol.header.n_frames != n_subsets as usize {
        return Err(PetError::VolumeMismatch(format!(
            "back-projection target must have exactly {n_subsets} frames"
        )));
    }

    let siddon = Siddon::new(&output_vol.header);
    let mut cache = LorCache::new(&input_proj.layout, n_subsets)?;

    output_vol.set_all_voxels_all_frames(0.0);

    let g = &input_proj.layout.geometry;

    for subset in 0..n_subsets {
        info!("back-projection: subset {} of {n_subsets}", subset + 1);
        output_vol.set_active_frame(subset as usize)?;

        for seg in -g.seg_offset..=g.seg_offset {
            let n_bins = cache.set_subset_and_segment(subset, seg);

            (0..n_bins).into_par_iter().for_each(|index| {
                let (valid, bin_index, a1, c1, a2, c2) = cache.get_lor(index);
                if !valid {
                    return;
                }
                let path = siddon.compute_path_between_crystals(
                    scanner,
                    a1 as u32,
                    c1 as u32,
                    a2 as u32,
                    c2 as u32,
                );
                let bin_value = input_proj.bin_at(seg, bin_index) as f64;
                output_vol.project_line_integral(&path, bin_value);
            });
        }
    }

    Ok(())
}

/// Back-projection of a constant-1 sinogram of the same shape as
/// `layout`: the per-subset normalization volume OSEM divides by.
pub fn compute_sensitivity_vol(
    layout: &ProjLayout,
    scanner: &Scanner,
    output_vol: &mut VolData,
    n_subsets: i32,
) -> Result<()> {
    debug!("computing sensitivity volume for {n_subsets} subsets");
    let ones = ProjData::allocate(layout.clone(), 1.0);
    backward(&ones, scanner, output_vol, n_subsets)
}
