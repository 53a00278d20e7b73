use crate::error::{RasterError, Result};

/// Tuning knobs for the tile mapper and the forward/backward rasterizer.
///
/// Defaults match the reference renderer (the "from paper" comments in
/// `forward`/`backward`): `alpha_threshold = 1/255`, `clamp_max_alpha = 0.99`,
/// `saturate_threshold = 0.9999`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RasterConfig {
    /// Edge length of a square tile, in pixels.
    pub tile_size: u32,
    /// Lanes-per-pixel fan-out; `pixel_stride.0 * pixel_stride.1` must divide
    /// `tile_size * tile_size`. `backward()` only supports `(1, 1)`.
    pub pixel_stride: (u32, u32),
    /// Minimum per-Gaussian contribution before a sample is skipped.
    pub alpha_threshold: f32,
    /// Upper cap on effective alpha before compositing.
    pub clamp_max_alpha: f32,
    /// A pixel is marked saturated once accumulated opacity would exceed this.
    pub saturate_threshold: f32,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            tile_size: 16,
            pixel_stride: (1, 1),
            alpha_threshold: 1.0 / 255.0,
            clamp_max_alpha: 0.99,
            saturate_threshold: 0.9999,
        }
    }
}

impl RasterConfig {
    /// Number of worker lanes per tile (`tile_size^2 / pixel_stride.0 / pixel_stride.1`).
    pub fn block_area(&self) -> u32 {
        let tile_area = self.tile_size * self.tile_size;
        tile_area / (self.pixel_stride.0 * self.pixel_stride.1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(RasterError::InvalidConfig("tile_size must be > 0"));
        }
        let tile_area = self.tile_size * self.tile_size;
        let stride_area = self.pixel_stride.0 * self.pixel_stride.1;
        if stride_area == 0 || tile_area % stride_area != 0 {
            return Err(RasterError::InvalidPixelStride {
                stride: self.pixel_stride,
                tile_area,
            });
        }
        if !(0.0..=1.0).contains(&self.alpha_threshold) {
            return Err(RasterError::InvalidConfig(
                "alpha_threshold must be in [0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&self.clamp_max_alpha) {
            return Err(RasterError::InvalidConfig(
                "clamp_max_alpha must be in [0, 1)",
            ));
        }
        if !(0.0..1.0).contains(&self.saturate_threshold) {
            return Err(RasterError::InvalidConfig(
                "saturate_threshold must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RasterConfig::default().validate().expect("default config");
    }

    #[test]
    fn bad_pixel_stride_is_rejected() {
        let mut config = RasterConfig::default();
        config.pixel_stride = (3, 1); // tile_size=16 -> tile_area=256, not divisible by 3
        assert!(matches!(
            config.validate(),
            Err(RasterError::InvalidPixelStride { .. })
        ));
    }

    #[test]
    fn block_area_matches_formula() {
        let config = RasterConfig {
            tile_size: 16,
            pixel_stride: (2, 2),
            ..RasterConfig::default()
        };
        assert_eq!(config.block_area(), 16 * 16 / 4);
    }

    #[test]
    fn round_trips_through_json() {
        let config = RasterConfig {
            tile_size: 32,
            pixel_stride: (2, 1),
            ..RasterConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: RasterConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, parsed);
    }
}
