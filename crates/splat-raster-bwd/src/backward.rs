//! Backward tile rasterizer: analytic back-to-front gradient recurrence.
//!
//! Mirrors the forward pass's tile/task structure (one Rayon task per tile,
//! sequential phases within a pixel standing in for barriers) but walks each
//! tile's overlap range in reverse, from `image_last_valid` down to the first
//! overlap, recovering the pre-compositing transmittance at each step and
//! accumulating the standard alpha-compositing adjoint.

use rayon::prelude::*;

use splat_raster::conic::{conic_pdf_with_grad, Gaussian2D};
use splat_raster::error::Result;
use splat_raster::render::ForwardOutput;
use splat_raster::tile_mapper::TileMapping;
use splat_raster::validation::{check_finite_slice, ShapeCheck};
use splat_raster::{RasterConfig, RasterError};

use crate::atomic_accum::{as_atomic_f32_slice, atomic_add_f32};
use glam::Vec2;

/// Gradients with respect to the forward inputs.
#[derive(Debug, Clone)]
pub struct SplatGrads {
    /// `[N, 6] f32`, same packing as the forward `gaussians` buffer
    /// (`d_uv.x, d_uv.y, d_conic.a, d_conic.b*2, d_conic.c, d_alpha`).
    pub grad_points: Vec<f32>,
    /// `[N, feature_dim] f32`.
    pub grad_features: Vec<f32>,
}

/// Runs the backward rasterizer.
///
/// `forward_out` must be the [`ForwardOutput`] produced by
/// `splat_raster::render::forward` for the same `gaussians`/`mapping`.
/// `grad_image_feature` is the upstream gradient `dL/d(image_feature)`,
/// matching that buffer's shape. Only `config.pixel_stride == (1, 1)` is
/// supported.
pub fn backward(
    gaussians: &[f32],
    features: &[f32],
    feature_dim: usize,
    mapping: &TileMapping,
    image_size: (u32, u32),
    config: &RasterConfig,
    forward_out: &ForwardOutput,
    grad_image_feature: &[f32],
) -> Result<SplatGrads> {
    let _span = tracing::trace_span!("rasterize_backward").entered();
    config.validate()?;
    if config.pixel_stride != (1, 1) {
        return Err(RasterError::UnsupportedPixelStride(config.pixel_stride));
    }

    let n = gaussians.len() / 6;
    let (width, height) = image_size;
    let pixel_count = (width * height) as usize;

    ShapeCheck::new()
        .check("gaussians", gaussians.len(), n * 6)
        .check("features", features.len(), n * feature_dim)
        .check("image_alpha", forward_out.image_alpha.len(), pixel_count)
        .check(
            "image_last_valid",
            forward_out.image_last_valid.len(),
            pixel_count,
        )
        .check(
            "grad_image_feature",
            grad_image_feature.len(),
            pixel_count * feature_dim,
        )
        .finish()?;

    if cfg!(debug_assertions) {
        check_finite_slice("gaussians", gaussians)?;
        check_finite_slice("features", features)?;
        check_finite_slice("grad_image_feature", grad_image_feature)?;
    }

    let tile_size = config.tile_size as usize;
    let tiles_wide = (width as usize) / tile_size;
    let tiles_high = (height as usize) / tile_size;
    debug_assert_eq!(mapping.tile_ranges.len(), tiles_wide * tiles_high);

    let mut grad_points = vec![0.0f32; n * 6];
    let mut grad_features = vec![0.0f32; n * feature_dim];
    let grad_points_atomic = as_atomic_f32_slice(&mut grad_points);
    let grad_features_atomic = as_atomic_f32_slice(&mut grad_features);

    (0..tiles_high * tiles_wide).into_par_iter().for_each(|tile_id| {
        let tile_row = tile_id / tiles_wide;
        let tile_col = tile_id % tiles_wide;
        let range = mapping.tile_ranges[tile_id];
        let overlaps = &mapping.overlap_to_point[range[0] as usize..range[1] as usize];
        if overlaps.is_empty() {
            return;
        }

        let tile_x0 = tile_col * tile_size;
        let tile_y0 = tile_row * tile_size;

        for local_y in 0..tile_size {
            for local_x in 0..tile_size {
                let px = tile_x0 + local_x;
                let py = tile_y0 + local_y;
                let pixel_index = py * width as usize + px;

                let last_valid = forward_out.image_last_valid[pixel_index];
                if last_valid < 0 {
                    continue; // no contributor at this pixel: gradient stays zero
                }

                let pixel = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                let mut transmittance = 1.0 - forward_out.image_alpha[pixel_index];
                let mut accum_rec = vec![0.0f32; feature_dim];
                let mut last_feature = vec![0.0f32; feature_dim];
                let mut last_alpha = 0.0f32;

                let grad_feature_px = &grad_image_feature
                    [pixel_index * feature_dim..(pixel_index + 1) * feature_dim];

                for k in (0..=last_valid as usize).rev() {
                    let g = overlaps[k] as usize;
                    let gaussian = Gaussian2D::read(gaussians, g);
                    let (pdf, dp_dmu, dp_dconic) = conic_pdf_with_grad(pixel, gaussian.uv(), gaussian.conic());
                    let alpha_raw = gaussian.alpha * pdf;
                    if alpha_raw < config.alpha_threshold {
                        continue; // forward skipped this contributor too
                    }
                    let clamped = alpha_raw > config.clamp_max_alpha;
                    let alpha = alpha_raw.min(config.clamp_max_alpha);

                    transmittance /= 1.0 - alpha;

                    let mut d_alpha = 0.0f32;
                    for f in 0..feature_dim {
                        accum_rec[f] = last_alpha * last_feature[f] + (1.0 - last_alpha) * accum_rec[f];
                        last_feature[f] = features[g * feature_dim + f];
                        d_alpha += (last_feature[f] - accum_rec[f]) * grad_feature_px[f] * transmittance;

                        let grad_feature_contribution = alpha * transmittance * grad_feature_px[f];
                        atomic_add_f32(&grad_features_atomic[g * feature_dim + f], grad_feature_contribution);
                    }
                    last_alpha = alpha;

                    // The clamp is a non-differentiable hard ceiling: once
                    // saturated, neither opacity nor the conic/position
                    // gradient flows through it.
                    let (grad_opacity, grad_pdf) = if clamped {
                        (0.0, 0.0)
                    } else {
                        (d_alpha * pdf, d_alpha * gaussian.alpha)
                    };

                    let grad_mu = dp_dmu * grad_pdf;
                    let grad_conic_a = dp_dconic.d_a * grad_pdf;
                    let grad_conic_b2 = dp_dconic.d_b2 * grad_pdf;
                    let grad_conic_c = dp_dconic.d_c * grad_pdf;

                    let base = g * 6;
                    atomic_add_f32(&grad_points_atomic[base], grad_mu.x);
                    atomic_add_f32(&grad_points_atomic[base + 1], grad_mu.y);
                    atomic_add_f32(&grad_points_atomic[base + 2], grad_conic_a);
                    atomic_add_f32(&grad_points_atomic[base + 3], grad_conic_b2);
                    atomic_add_f32(&grad_points_atomic[base + 4], grad_conic_c);
                    atomic_add_f32(&grad_points_atomic[base + 5], grad_opacity);
                }
            }
        }
    });

    Ok(SplatGrads {
        grad_points,
        grad_features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use splat_raster::tile_mapper::map_to_tiles;
    use splat_raster::render::forward;

    fn gaussian(uv: (f32, f32), conic: (f32, f32, f32), alpha: f32) -> [f32; 6] {
        [uv.0, uv.1, conic.0, conic.1, conic.2, alpha]
    }

    #[test]
    fn zero_gradient_beyond_last_valid() {
        let g = gaussian((8.0, 8.0), (4.0, 0.0, 4.0), 0.9);
        let depths = [1.0];
        let features = [1.0f32];
        let mapping = map_to_tiles(&g, &depths, (16, 16), 16).expect("map_to_tiles");
        let config = RasterConfig::default();
        let out = forward(&g, &features, 1, &mapping, (16, 16), &config).expect("forward");

        let grad_image_feature = vec![1.0f32; 16 * 16];
        let grads = backward(
            &g,
            &features,
            1,
            &mapping,
            (16, 16),
            &config,
            &out,
            &grad_image_feature,
        )
        .expect("backward");

        let corner_index = 0usize;
        assert_eq!(out.image_last_valid[corner_index], -1);
        // No contributor at the corner pixel: its gradient contribution to
        // this single Gaussian should come entirely from pixels it does
        // touch. We can't isolate per-pixel contribution directly, but the
        // Gaussian's total gradient must be finite and non-zero since it does
        // contribute somewhere.
        assert!(grads.grad_points.iter().all(|v| v.is_finite()));
        assert!(grads.grad_features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_unsupported_pixel_stride() {
        let g = gaussian((8.0, 8.0), (1.0, 0.0, 1.0), 0.9);
        let depths = [1.0];
        let features = [1.0f32];
        let mapping = map_to_tiles(&g, &depths, (16, 16), 16).expect("map_to_tiles");
        let mut config = RasterConfig::default();
        let out = forward(&g, &features, 1, &mapping, (16, 16), &config).expect("forward");
        config.pixel_stride = (2, 2);

        let grad_image_feature = vec![0.0f32; 16 * 16];
        let err = backward(
            &g,
            &features,
            1,
            &mapping,
            (16, 16),
            &config,
            &out,
            &grad_image_feature,
        )
        .unwrap_err();
        assert!(matches!(err, RasterError::UnsupportedPixelStride(_)));
    }

    #[test]
    fn gradient_matches_finite_difference_on_alpha() {
        // Perturb a single Gaussian's opacity (a one-parameter slice of a full
        // a single Gaussian's opacity and compare the finite-difference change
        // in the pixel-summed feature loss against the analytic gradient.
        let uv = (8.0, 8.0);
        let conic = (1.0, 0.0, 1.0);
        let features = [1.0f32];
        let depths = [1.0];
        let config = RasterConfig::default();

        let loss_at = |alpha: f32| -> f32 {
            let g = gaussian(uv, conic, alpha);
            let mapping = map_to_tiles(&g, &depths, (16, 16), 16).expect("map_to_tiles");
            let out = forward(&g, &features, 1, &mapping, (16, 16), &config).expect("forward");
            out.image_feature.iter().sum::<f32>()
        };

        let alpha0 = 0.5f32;
        let eps = 1e-3;
        let numeric = (loss_at(alpha0 + eps) - loss_at(alpha0 - eps)) / (2.0 * eps);

        let g = gaussian(uv, conic, alpha0);
        let mapping = map_to_tiles(&g, &depths, (16, 16), 16).expect("map_to_tiles");
        let out = forward(&g, &features, 1, &mapping, (16, 16), &config).expect("forward");
        let grad_image_feature = vec![1.0f32; 16 * 16];
        let grads = backward(
            &g,
            &features,
            1,
            &mapping,
            (16, 16),
            &config,
            &out,
            &grad_image_feature,
        )
        .expect("backward");

        let analytic = grads.grad_points[5]; // d_alpha slot
        assert!(
            (analytic - numeric).abs() < 0.05 * numeric.abs().max(1.0),
            "analytic {analytic} vs numeric {numeric}"
        );
    }
}
