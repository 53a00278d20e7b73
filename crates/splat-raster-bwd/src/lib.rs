//! Backward pass for the tile-based 2D Gaussian splat rasterizer.
//!
//! Split out from `splat-raster` so the forward pass and its tile mapper have
//! no dependency on gradient bookkeeping; most consumers (e.g. a viewer) only
//! need `splat-raster`.

mod atomic_accum;
mod backward;

pub use backward::{backward, SplatGrads};
