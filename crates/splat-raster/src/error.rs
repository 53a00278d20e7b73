use thiserror::Error;

/// Errors surfaced by the public entry points of this crate.
///
/// No caller-reachable path in this crate panics; everything that depends on
/// caller-supplied data returns one of these instead.
#[derive(Debug, Error, PartialEq)]
pub enum RasterError {
    #[error("shape mismatch in '{name}': expected {expected}, got {got}")]
    ShapeMismatch {
        name: &'static str,
        expected: String,
        got: String,
    },

    #[error(
        "image size {width}x{height} is not a multiple of tile_size {tile_size}; pad before calling"
    )]
    MisalignedImage {
        width: u32,
        height: u32,
        tile_size: u32,
    },

    #[error("non-finite value in '{field}' at index {index}: {value}")]
    NonFinite {
        field: &'static str,
        index: usize,
        value: f32,
    },

    #[error("depth at index {index} must be non-negative, got {value}")]
    NegativeDepth { index: usize, value: f32 },

    #[error(
        "invalid config: pixel_stride {stride:?} does not evenly divide tile_size^2 ({tile_area})"
    )]
    InvalidPixelStride { stride: (u32, u32), tile_area: u32 },

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("backward() only supports pixel_stride (1, 1), got {0:?}")]
    UnsupportedPixelStride((u32, u32)),
}

pub type Result<T> = std::result::Result<T, RasterError>;
