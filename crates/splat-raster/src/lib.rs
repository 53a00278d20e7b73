//! Tile-based 2D Gaussian splat rasterizer: conic math, tile mapping and
//! depth-sort, and the forward compositing pass.
//!
//! The backward pass lives in the sibling `splat-raster-bwd` crate, keeping
//! gradient bookkeeping out of the forward-only dependency graph.

pub mod config;
pub mod conic;
pub mod error;
pub mod render;
pub mod sort_key;
pub mod tile_mapper;
pub mod validation;

pub use config::RasterConfig;
pub use conic::{conic_pdf, conic_pdf_with_grad, radii_from_conic, Conic, ConicGrad, Gaussian2D};
pub use error::{RasterError, Result};
pub use render::{forward, ForwardOutput};
pub use tile_mapper::{map_to_tiles, TileMapping};
