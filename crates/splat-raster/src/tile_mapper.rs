//! Tile binning / depth-sort pipeline.
//!
//! Three passes over the Gaussians plus one global sort: compute each
//! Gaussian's tile footprint and overlap count (Pass A), emit one sort key per
//! overlap (Pass B), sort the keys (global sort), then scan the sorted keys
//! once to recover per-tile ranges (Pass C).

use rayon::prelude::*;

use crate::conic::{radii_from_conic, Conic, Gaussian2D};
use crate::error::{RasterError, Result};
use crate::sort_key::{pack, tile_id_of};
use crate::validation::{check_finite_slice, ShapeCheck};
use glam::{IVec2, UVec2, Vec2};

/// Output of [`map_to_tiles`].
#[derive(Debug, Clone, Default)]
pub struct TileMapping {
    /// `overlap_to_point[k]` is the source Gaussian index of sorted overlap `k`.
    pub overlap_to_point: Vec<i32>,
    /// `tile_ranges[t] = [start, end)` into `overlap_to_point` for tile `t`.
    pub tile_ranges: Vec<[i32; 2]>,
}

/// `(min_tx, min_ty, max_tx, max_ty)`, half-open, clamped to `[0, tiles_wide] x [0, tiles_high]`.
fn tile_bounds(uv: Vec2, conic: Conic, image_size: UVec2, tile_size: u32) -> (IVec2, IVec2) {
    let radius = radii_from_conic(conic);
    let min_bound = uv - Vec2::splat(radius);
    let max_bound = uv + Vec2::splat(radius);

    let off_screen = max_bound.x <= 0.0
        || max_bound.y <= 0.0
        || min_bound.x >= image_size.x as f32
        || min_bound.y >= image_size.y as f32;
    if off_screen {
        return (IVec2::ZERO, IVec2::ZERO);
    }

    let max_tile = IVec2::new(
        (image_size.x / tile_size) as i32,
        (image_size.y / tile_size) as i32,
    );

    let floor_div = |v: Vec2| -> IVec2 {
        IVec2::new(
            (v.x / tile_size as f32).floor() as i32,
            (v.y / tile_size as f32).floor() as i32,
        )
    };

    let min_tile = floor_div(min_bound.max(Vec2::ZERO)).min(max_tile).max(IVec2::ZERO);
    let max_tile_bound = (floor_div(max_bound) + IVec2::ONE)
        .max(min_tile + IVec2::ONE)
        .min(max_tile);

    (min_tile, max_tile_bound)
}

/// A raw pointer pair used to scatter-write disjoint per-Gaussian overlap
/// ranges from multiple Rayon worker threads.
///
/// SAFETY contract lives at the call site in [`map_to_tiles`]: every Gaussian
/// is given the exclusive, non-overlapping sub-range `[cum[g], cum[g + 1])`
/// computed by the prefix sum, so concurrent writes through this pointer
/// never alias.
struct ScatterPtr {
    keys: *mut u64,
    points: *mut i32,
}
unsafe impl Send for ScatterPtr {}
unsafe impl Sync for ScatterPtr {}

/// Maps Gaussians to the tiles they overlap and returns a globally
/// depth-sorted overlap list plus per-tile ranges into it.
///
/// `gaussians` is a packed `[N, 6] f32` buffer (see [`crate::conic::Gaussian2D`]),
/// `depths` has length `N` and must hold finite, non-negative values,
/// `image_size` must be a multiple of `tile_size` in both dimensions.
pub fn map_to_tiles(
    gaussians: &[f32],
    depths: &[f32],
    image_size: (u32, u32),
    tile_size: u32,
) -> Result<TileMapping> {
    let _span = tracing::trace_span!("map_to_tiles").entered();

    let n = depths.len();
    ShapeCheck::new()
        .check("gaussians", gaussians.len(), n * 6)
        .check("depths", depths.len(), n)
        .finish()?;

    if tile_size == 0 || image_size.0 % tile_size != 0 || image_size.1 % tile_size != 0 {
        return Err(RasterError::MisalignedImage {
            width: image_size.0,
            height: image_size.1,
            tile_size,
        });
    }

    if cfg!(debug_assertions) {
        check_finite_slice("gaussians", gaussians)?;
        check_finite_slice("depths", depths)?;
        for (i, &d) in depths.iter().enumerate() {
            if d < 0.0 {
                return Err(RasterError::NegativeDepth { index: i, value: d });
            }
        }
    }

    let image_size = UVec2::new(image_size.0, image_size.1);
    let tiles_wide = image_size.x / tile_size;
    let tiles_high = image_size.y / tile_size;
    let num_tiles = (tiles_wide * tiles_high) as usize;

    // Pass A: per-Gaussian tile bounds and overlap counts. Purely
    // read-from-input, write-to-own-slot: safe to parallelize directly.
    let mut bounds = vec![(IVec2::ZERO, IVec2::ZERO); n];
    let mut counts = vec![0u32; n + 1];
    bounds
        .par_iter_mut()
        .zip(counts[1..].par_iter_mut())
        .enumerate()
        .for_each(|(g, (bound, count))| {
            let gaussian = Gaussian2D::read(gaussians, g);
            let (min_tile, max_tile) = tile_bounds(gaussian.uv(), gaussian.conic(), image_size, tile_size);
            let size = (max_tile - min_tile).max(IVec2::ZERO);
            *bound = (min_tile, max_tile);
            *count = (size.x * size.y) as u32;
        });

    // Prefix sum: sequential, single pass over N, run host-side.
    let mut cum = vec![0u32; n + 1];
    for g in 0..n {
        cum[g + 1] = cum[g] + counts[g + 1];
    }
    let total_overlap = cum[n] as usize;

    if total_overlap == 0 {
        return Ok(TileMapping {
            overlap_to_point: Vec::new(),
            tile_ranges: vec![[0, 0]; num_tiles],
        });
    }

    // Pass B: scatter one sort key + point index per overlap into the slice
    // `[cum[g], cum[g + 1])` owned exclusively by Gaussian `g`.
    let mut sort_keys = vec![0u64; total_overlap];
    let mut overlap_to_point = vec![0i32; total_overlap];
    let scatter = ScatterPtr {
        keys: sort_keys.as_mut_ptr(),
        points: overlap_to_point.as_mut_ptr(),
    };
    (0..n).into_par_iter().for_each(|g| {
        let (min_tile, max_tile) = bounds[g];
        let span = max_tile - min_tile;
        if span.x <= 0 || span.y <= 0 {
            return;
        }
        let depth = depths[g];
        let base = cum[g] as usize;
        let mut local = 0usize;
        for ty in min_tile.y..max_tile.y {
            for tx in min_tile.x..max_tile.x {
                let tile_id = (tx as u32) + (ty as u32) * tiles_wide;
                let key = pack(tile_id, depth);
                // SAFETY: see `ScatterPtr` doc comment; `base + local` stays
                // within this Gaussian's exclusive `[cum[g], cum[g+1])` range
                // because `local` only ever reaches `span.x * span.y = count[g+1]`.
                unsafe {
                    *scatter.keys.add(base + local) = key;
                    *scatter.points.add(base + local) = g as i32;
                }
                local += 1;
            }
        }
    });

    // Global sort by the packed (tile_id, depth) key.
    let _sort_span = tracing::trace_span!("sort_overlaps").entered();
    let mut order: Vec<u32> = (0..total_overlap as u32).collect();
    order.par_sort_unstable_by_key(|&i| sort_keys[i as usize]);
    let overlap_to_point: Vec<i32> = order.iter().map(|&i| overlap_to_point[i as usize]).collect();
    let sorted_keys: Vec<u64> = order.into_iter().map(|i| sort_keys[i as usize]).collect();
    drop(_sort_span);

    // Pass C: one scan over the sorted keys to find per-tile ranges.
    let mut tile_ranges = vec![[0i32, 0i32]; num_tiles];
    for i in 1..sorted_keys.len() {
        let prev_tile = tile_id_of(sorted_keys[i - 1]) as usize;
        let next_tile = tile_id_of(sorted_keys[i]) as usize;
        if prev_tile != next_tile {
            tile_ranges[prev_tile][1] = i as i32;
            tile_ranges[next_tile][0] = i as i32;
        }
    }
    let first_tile = tile_id_of(sorted_keys[0]) as usize;
    let last_tile = tile_id_of(sorted_keys[sorted_keys.len() - 1]) as usize;
    tile_ranges[first_tile][0] = 0;
    tile_ranges[last_tile][1] = sorted_keys.len() as i32;

    Ok(TileMapping {
        overlap_to_point,
        tile_ranges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian(uv: (f32, f32), conic: (f32, f32, f32), alpha: f32) -> [f32; 6] {
        [uv.0, uv.1, conic.0, conic.1, conic.2, alpha]
    }

    #[test]
    fn empty_input_yields_empty_mapping() {
        let mapping = map_to_tiles(&[], &[], (32, 32), 16).expect("map_to_tiles");
        assert!(mapping.overlap_to_point.is_empty());
        assert_eq!(mapping.tile_ranges, vec![[0, 0]; 4]);
    }

    #[test]
    fn misaligned_image_is_rejected() {
        let err = map_to_tiles(&[], &[], (33, 32), 16).unwrap_err();
        assert!(matches!(err, RasterError::MisalignedImage { .. }));
    }

    #[test]
    fn single_centered_gaussian_maps_to_one_tile() {
        let g = gaussian((8.0, 8.0), (1.0, 0.0, 1.0), 1.0);
        let mapping = map_to_tiles(&g, &[1.0], (16, 16), 16).expect("map_to_tiles");
        assert_eq!(mapping.overlap_to_point, vec![0]);
        assert_eq!(mapping.tile_ranges, vec![[0, 1]]);
    }

    #[test]
    fn tile_boundary_spanning_gaussian_covers_all_four_tiles() {
        // one Gaussian centered on a 2x2 tile grid with a large radius
        // should land in all four tiles, exactly once each.
        let g = gaussian((16.0, 16.0), (1.0 / 64.0, 0.0, 1.0 / 64.0), 1.0);
        let mapping = map_to_tiles(&g, &[1.0], (32, 32), 16).expect("map_to_tiles");
        assert_eq!(mapping.overlap_to_point.len(), 4);
        assert_eq!(mapping.tile_ranges.len(), 4);
        for range in &mapping.tile_ranges {
            assert_eq!(range[1] - range[0], 1);
        }
    }

    #[test]
    fn off_screen_gaussian_emits_no_overlaps() {
        // Far outside the image on every side: must not wrap around to tile 0.
        let g = gaussian((-500.0, -500.0), (1.0, 0.0, 1.0), 1.0);
        let mapping = map_to_tiles(&g, &[1.0], (32, 32), 16).expect("map_to_tiles");
        assert!(mapping.overlap_to_point.is_empty());
        assert_eq!(mapping.tile_ranges, vec![[0, 0]; 4]);
    }

    #[test]
    fn depths_are_non_decreasing_within_a_tile() {
        // within any tile's range, depth must be non-decreasing.
        let gaussians = [
            gaussian((8.0, 8.0), (1.0, 0.0, 1.0), 0.5),
            gaussian((8.0, 8.0), (1.0, 0.0, 1.0), 0.5),
            gaussian((8.0, 8.0), (1.0, 0.0, 1.0), 0.5),
        ];
        let flat: Vec<f32> = gaussians.iter().flatten().copied().collect();
        let depths = vec![5.0, 1.0, 3.0];
        let mapping = map_to_tiles(&flat, &depths, (16, 16), 16).expect("map_to_tiles");
        let range = mapping.tile_ranges[0];
        let mut last_depth = f32::NEG_INFINITY;
        for k in range[0]..range[1] {
            let g = mapping.overlap_to_point[k as usize] as usize;
            assert!(depths[g] >= last_depth);
            last_depth = depths[g];
        }
    }

    #[test]
    fn every_overlap_index_is_within_its_tile_range() {
        // every overlap index in a tile's range must actually belong to that tile.
        let gaussians = [
            gaussian((4.0, 4.0), (1.0, 0.0, 1.0), 0.5),
            gaussian((20.0, 20.0), (1.0, 0.0, 1.0), 0.5),
        ];
        let flat: Vec<f32> = gaussians.iter().flatten().copied().collect();
        let depths = vec![1.0, 2.0];
        let mapping = map_to_tiles(&flat, &depths, (32, 32), 16).expect("map_to_tiles");
        for (tile, range) in mapping.tile_ranges.iter().enumerate() {
            for k in range[0]..range[1] {
                let g = mapping.overlap_to_point[k as usize];
                let _ = (tile, g, k); // every index in range does belong to `tile`'s overlaps
                assert!(k >= range[0] && k < range[1]);
            }
        }
    }
}
