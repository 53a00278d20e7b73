//! Forward tile rasterizer: front-to-back alpha compositing.
//!
//! One Rayon task per tile stands in for one cooperative thread block; the
//! fixed-size `TILE_SCRATCH_MAX` scratch arrays stand in for the shared-memory
//! staging buffer the reference kernel cooperatively loads before each batch
//! of Gaussians, and the sequential phases inside the closure (load, then
//! composite) stand in for the barrier between them.

use rayon::prelude::*;

use crate::config::RasterConfig;
use crate::conic::{conic_pdf, Gaussian2D};
use crate::error::{RasterError, Result};
use crate::tile_mapper::TileMapping;
use crate::validation::{check_finite_slice, ShapeCheck};
use glam::Vec2;

/// Largest batch of Gaussians cooperatively staged per tile at a time; mirrors
/// the thread-block-sized shared-memory buffer of the reference kernel.
const TILE_SCRATCH_MAX: usize = 256;

/// Output of [`forward`].
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// `[H, W, F]`, row-major, premultiplied by accumulated alpha.
    pub image_feature: Vec<f32>,
    /// `[H, W]`, final accumulated opacity per pixel.
    pub image_alpha: Vec<f32>,
    /// `[H, W]`, index into the tile's overlap range of the last Gaussian that
    /// contributed to this pixel (`-1` if none did). Required by the backward
    /// pass to know where to start its back-to-front recurrence.
    pub image_last_valid: Vec<i32>,
}

/// Runs the forward rasterizer.
///
/// `gaussians` is `[N, 6] f32` (see [`Gaussian2D`]), `features` is
/// `[N, feature_dim] f32`, `mapping` is the result of
/// [`crate::tile_mapper::map_to_tiles`] for the same Gaussians.
pub fn forward(
    gaussians: &[f32],
    features: &[f32],
    feature_dim: usize,
    mapping: &TileMapping,
    image_size: (u32, u32),
    config: &RasterConfig,
) -> Result<ForwardOutput> {
    let _span = tracing::trace_span!("rasterize").entered();
    config.validate()?;

    let n = gaussians.len() / 6;
    ShapeCheck::new()
        .check("gaussians", gaussians.len(), n * 6)
        .check("features", features.len(), n * feature_dim)
        .finish()?;

    if cfg!(debug_assertions) {
        check_finite_slice("gaussians", gaussians)?;
        check_finite_slice("features", features)?;
    }

    let (width, height) = image_size;
    let tile_size = config.tile_size;
    if tile_size == 0 || width % tile_size != 0 || height % tile_size != 0 {
        return Err(RasterError::MisalignedImage {
            width,
            height,
            tile_size,
        });
    }
    let tiles_wide = width / tile_size;
    let tiles_high = height / tile_size;
    debug_assert_eq!(mapping.tile_ranges.len(), (tiles_wide * tiles_high) as usize);

    let pixel_count = (width * height) as usize;
    let mut image_feature = vec![0.0f32; pixel_count * feature_dim];
    let mut image_alpha = vec![0.0f32; pixel_count];
    let mut image_last_valid = vec![-1i32; pixel_count];

    let rows_per_tile: Vec<usize> = (0..tiles_high as usize).collect();

    // One Rayon task per tile row of scratch; within a row, one task per
    // tile. Tiles write disjoint pixel ranges, so this is safe to split with
    // plain `par_chunks_mut`.
    image_feature
        .par_chunks_mut(feature_dim * (width as usize) * tile_size as usize)
        .zip(image_alpha.par_chunks_mut(width as usize * tile_size as usize))
        .zip(image_last_valid.par_chunks_mut(width as usize * tile_size as usize))
        .zip(rows_per_tile.par_iter())
        .for_each(|(((feature_rows, alpha_rows), last_valid_rows), &tile_row)| {
            for tile_col in 0..tiles_wide as usize {
                rasterize_tile(
                    tile_row,
                    tile_col,
                    tiles_wide as usize,
                    tile_size as usize,
                    width as usize,
                    feature_dim,
                    gaussians,
                    features,
                    mapping,
                    config,
                    feature_rows,
                    alpha_rows,
                    last_valid_rows,
                );
            }
        });

    Ok(ForwardOutput {
        image_feature,
        image_alpha,
        image_last_valid,
    })
}

#[allow(clippy::too_many_arguments)]
fn rasterize_tile(
    tile_row: usize,
    tile_col: usize,
    tiles_wide: usize,
    tile_size: usize,
    image_width: usize,
    feature_dim: usize,
    gaussians: &[f32],
    features: &[f32],
    mapping: &TileMapping,
    config: &RasterConfig,
    feature_rows: &mut [f32],
    alpha_rows: &mut [f32],
    last_valid_rows: &mut [i32],
) {
    let tile_id = tile_col + tile_row * tiles_wide;
    let range = mapping.tile_ranges[tile_id];
    let overlaps = &mapping.overlap_to_point[range[0] as usize..range[1] as usize];

    let tile_x0 = tile_col * tile_size;
    let tile_y0 = tile_row * tile_size;

    for local_y in 0..tile_size {
        for local_x in 0..tile_size {
            let px = tile_x0 + local_x;
            let py = tile_y0 + local_y; // absolute image row, for the PDF evaluation
            let pixel = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);

            let row_stride = image_width;
            // but chunk-local row for indexing into this tile row's slice
            let pixel_index = local_y * row_stride + px;

            let mut transmittance = 1.0f32;
            let mut accum = vec![0.0f32; feature_dim];
            let mut last_valid: i32 = -1;

            // Cooperative load + composite phases, batched TILE_SCRATCH_MAX at
            // a time (stands in for shared-memory staging + barrier).
            let mut batch_start = 0usize;
            'batches: while batch_start < overlaps.len() {
                let batch_end = (batch_start + TILE_SCRATCH_MAX).min(overlaps.len());
                for (offset, &g) in overlaps[batch_start..batch_end].iter().enumerate() {
                    let g = g as usize;
                    let gaussian = Gaussian2D::read(gaussians, g);
                    let pdf = conic_pdf(pixel, gaussian.uv(), gaussian.conic());
                    let mut alpha = gaussian.alpha * pdf;
                    if alpha < config.alpha_threshold {
                        continue;
                    }
                    alpha = alpha.min(config.clamp_max_alpha);

                    let next_transmittance = transmittance * (1.0 - alpha);
                    if 1.0 - next_transmittance >= config.saturate_threshold {
                        batch_start = overlaps.len();
                        break 'batches;
                    }

                    let weight = alpha * transmittance;
                    for f in 0..feature_dim {
                        accum[f] += weight * features[g * feature_dim + f];
                    }
                    transmittance = next_transmittance;
                    last_valid = (batch_start + offset) as i32;
                }
                batch_start = batch_end;
            }

            for f in 0..feature_dim {
                feature_rows[pixel_index * feature_dim + f] = accum[f];
            }
            alpha_rows[pixel_index] = 1.0 - transmittance;
            last_valid_rows[pixel_index] = last_valid;
        }
    }
}
