//! Typed failures of tile planning and compositing.
//!
//! Everything else in the crate reports through `anyhow`; these variants exist
//! so callers can tell a bad configuration apart from a failed inference run
//! via `anyhow::Error::downcast_ref::<TilingError>()`.

use std::fmt;

use thiserror::Error;

/// Image axis a grid is planned along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TilingError {
    #[error("tile size {tile_size} on {axis} axis exceeds source size {source_size}")]
    TileExceedsSource {
        axis: Axis,
        tile_size: u32,
        source_size: u32,
    },

    #[error(
        "border of {border_lines} lines leaves no stride for tile size {tile_size} on {axis} axis"
    )]
    NonPositiveStride {
        axis: Axis,
        tile_size: u32,
        border_lines: u32,
    },

    #[error("crop factor must be at least 1, got {0}")]
    InvalidCropFactor(u32),

    #[error("native upsample factor {native} is not divisible by crop factor {crop_factor}")]
    UpsampleNotDivisible { native: u32, crop_factor: u32 },

    #[error("model output {output_w}x{output_h} is not an integer multiple of input {input_w}x{input_h} on both axes")]
    AnisotropicModel {
        input_w: u32,
        input_h: u32,
        output_w: u32,
        output_h: u32,
    },

    #[error("{axis} size {size} scaled by {factor} overflows")]
    DimensionOverflow { axis: Axis, size: u32, factor: u32 },

    #[error("tile at ({x}, {y}) of size {width}x{height} exceeds source {source_w}x{source_h}")]
    TileOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        source_w: u32,
        source_h: u32,
    },

    #[error("inference returned shape {actual:?}, expected {expected:?}")]
    OutputShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("tiling cancelled after {completed} of {total} tiles")]
    Cancelled { completed: usize, total: usize },
}

impl TilingError {
    /// Configuration errors are detected before the first inference call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::TileExceedsSource { .. }
                | Self::NonPositiveStride { .. }
                | Self::InvalidCropFactor(_)
                | Self::UpsampleNotDivisible { .. }
                | Self::AnisotropicModel { .. }
                | Self::DimensionOverflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_classification() {
        assert!(TilingError::InvalidCropFactor(0).is_configuration());
        assert!(TilingError::TileExceedsSource {
            axis: Axis::X,
            tile_size: 10,
            source_size: 5
        }
        .is_configuration());
        assert!(!TilingError::Cancelled {
            completed: 1,
            total: 4
        }
        .is_configuration());
    }

    #[test]
    fn messages_name_the_axis() {
        let err = TilingError::NonPositiveStride {
            axis: Axis::Y,
            tile_size: 20,
            border_lines: 10,
        };
        assert_eq!(
            err.to_string(),
            "border of 10 lines leaves no stride for tile size 20 on y axis"
        );
    }
}
