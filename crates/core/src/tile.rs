//! Tile extraction and the two resampled model inputs.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use crate::error::TilingError;
use crate::geometry::{ModelGeometry, TensorLayout};
use crate::grid::{TilePlan, TileRect};
use crate::tensor::rgb_to_tensor;

/// Both tensors handed to the model for one tile, NCHW.
pub struct TileInputs {
    /// The crop at native input resolution.
    pub original: Array4<f32>,
    /// The same crop bicubic-upsampled to native output resolution.
    pub bicubic: Array4<f32>,
}

/// Copy a `width x height` region out of `source`.
pub fn extract_tile(
    source: &RgbImage,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Result<RgbImage, TilingError> {
    let fits_x = x.checked_add(width).is_some_and(|end| end <= source.width());
    let fits_y = y.checked_add(height).is_some_and(|end| end <= source.height());
    if !fits_x || !fits_y {
        return Err(TilingError::TileOutOfBounds {
            x,
            y,
            width,
            height,
            source_w: source.width(),
            source_h: source.height(),
        });
    }
    Ok(imageops::crop_imm(source, x, y, width, height).to_image())
}

/// Build the model inputs for one tile of `plan`.
///
/// Both resamples start from the full-size crop so interpolation error does
/// not compound.
pub fn prepare_tile(
    source: &RgbImage,
    plan: &TilePlan,
    tile: &TileRect,
    geometry: &ModelGeometry,
) -> Result<TileInputs, TilingError> {
    let crop = extract_tile(source, tile.x, tile.y, plan.tile_width, plan.tile_height)?;

    let original = if plan.crop_factor > 1 {
        imageops::resize(
            &crop,
            geometry.input_width,
            geometry.input_height,
            FilterType::CatmullRom,
        )
    } else {
        crop.clone()
    };
    let bicubic = imageops::resize(
        &crop,
        geometry.output_width,
        geometry.output_height,
        FilterType::CatmullRom,
    );

    Ok(TileInputs {
        original: rgb_to_tensor(&original, geometry.input_range, TensorLayout::Nchw),
        bicubic: rgb_to_tensor(&bicubic, geometry.input_range, TensorLayout::Nchw),
    })
}
