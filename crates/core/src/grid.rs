//! Tile grid planning.
//!
//! A source image is covered by fixed-size tiles whose origins are spaced by
//! `tile - 2 * border`. After inference each tile loses `border * U` output
//! pixels on every edge, so the trusted interiors of neighbouring tiles meet
//! exactly on the output canvas.

use serde::{Deserialize, Serialize};

use crate::error::{Axis, TilingError};
use crate::geometry::ModelGeometry;

/// What to do with the strip at the far edge that a whole stride cannot reach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Drop it: the canvas ends where the last whole stride ends.
    #[default]
    Discard,
    /// Add one extra tile flush with the source edge. Its interior overlaps
    /// the previous tile and overwrites it.
    Align,
}

impl EdgePolicy {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "align" | "aligned" | "snap" => Self::Align,
            _ => Self::Discard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingSettings {
    /// Source pixels per model input pixel, per axis.
    pub crop_factor: u32,
    /// Unreliable edge lines, in source pixels, discarded from every tile.
    pub border_lines: u32,
    pub edge_policy: EdgePolicy,
}

impl Default for TilingSettings {
    fn default() -> Self {
        Self {
            crop_factor: 2,
            border_lines: 10,
            edge_policy: EdgePolicy::Discard,
        }
    }
}

/// Tile origins along one axis.
///
/// Origins are `0, step, 2*step, ..` up to the last one whose tile still fits
/// in `source_size`. With [`EdgePolicy::Align`] an origin at
/// `source_size - tile_size` is appended when the strided tiles stop short.
pub fn axis_origins(
    axis: Axis,
    source_size: u32,
    tile_size: u32,
    border_lines: u32,
    policy: EdgePolicy,
) -> Result<Vec<u32>, TilingError> {
    if tile_size > source_size {
        return Err(TilingError::TileExceedsSource {
            axis,
            tile_size,
            source_size,
        });
    }

    let step = u64::from(tile_size).saturating_sub(2 * u64::from(border_lines));
    if step == 0 {
        return Err(TilingError::NonPositiveStride {
            axis,
            tile_size,
            border_lines,
        });
    }
    // step <= tile_size, so it fits back into u32.
    let step = step as u32;

    let last_fit = (source_size - tile_size) / step;
    let mut origins: Vec<u32> = (0..=last_fit).map(|i| i * step).collect();

    if policy == EdgePolicy::Align {
        let flush = source_size - tile_size;
        if origins.last().copied() != Some(flush) {
            origins.push(flush);
        }
    }

    Ok(origins)
}

/// One tile of a plan, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileRect {
    pub index: usize,
    pub x: u32,
    pub y: u32,
}

/// Where a tile's trusted interior lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// Offset of the interior inside the model output tile (both axes).
    pub crop: u32,
    pub dest_x: u32,
    pub dest_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Immutable layout of a tiled run, computed before any inference call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TilePlan {
    pub source_width: u32,
    pub source_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub border_lines: u32,
    pub crop_factor: u32,
    /// Canvas pixels per source pixel.
    pub effective_upsample: u32,
    pub xs: Vec<u32>,
    pub ys: Vec<u32>,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl TilePlan {
    pub fn new(
        source_width: u32,
        source_height: u32,
        geometry: &ModelGeometry,
        settings: &TilingSettings,
    ) -> Result<Self, TilingError> {
        let crop_factor = settings.crop_factor;
        if crop_factor == 0 {
            return Err(TilingError::InvalidCropFactor(crop_factor));
        }

        let native = geometry.upsample_factor()?;
        if native % crop_factor != 0 {
            return Err(TilingError::UpsampleNotDivisible {
                native,
                crop_factor,
            });
        }
        let effective_upsample = native / crop_factor;

        let tile_width = geometry.input_width * crop_factor;
        let tile_height = geometry.input_height * crop_factor;
        let border_lines = settings.border_lines;

        let xs = axis_origins(
            Axis::X,
            source_width,
            tile_width,
            border_lines,
            settings.edge_policy,
        )?;
        let ys = axis_origins(
            Axis::Y,
            source_height,
            tile_height,
            border_lines,
            settings.edge_policy,
        )?;

        // Both vectors hold at least origin 0.
        let last_x = xs[xs.len() - 1];
        let last_y = ys[ys.len() - 1];
        let canvas_width = (last_x + tile_width - 2 * border_lines) * effective_upsample;
        let canvas_height = (last_y + tile_height - 2 * border_lines) * effective_upsample;

        Ok(Self {
            source_width,
            source_height,
            tile_width,
            tile_height,
            border_lines,
            crop_factor,
            effective_upsample,
            xs,
            ys,
            canvas_width,
            canvas_height,
        })
    }

    pub fn tile_count(&self) -> usize {
        self.xs.len() * self.ys.len()
    }

    /// Tiles in row-major order: y outer, x inner.
    pub fn tiles(&self) -> impl Iterator<Item = TileRect> + '_ {
        self.ys
            .iter()
            .flat_map(move |&y| self.xs.iter().map(move |&x| (x, y)))
            .enumerate()
            .map(|(index, (x, y))| TileRect { index, x, y })
    }

    /// Side length of the square output tile border that is thrown away.
    pub fn output_crop(&self) -> u32 {
        self.border_lines * self.effective_upsample
    }

    /// Expected output tile size `(width, height)` after inference.
    pub fn output_tile_size(&self) -> (u32, u32) {
        (
            self.tile_width * self.effective_upsample,
            self.tile_height * self.effective_upsample,
        )
    }

    pub fn placement(&self, tile: &TileRect) -> Placement {
        let u = self.effective_upsample;
        let border = 2 * self.border_lines;
        Placement {
            crop: self.output_crop(),
            dest_x: tile.x * u,
            dest_y: tile.y * u,
            width: (self.tile_width - border) * u,
            height: (self.tile_height - border) * u,
        }
    }
}
