//! Seams between the compositors and whatever runs the network.

use anyhow::Result;
use ndarray::Array4;

use crate::geometry::ModelGeometry;

/// A super-resolution model working on fixed-size tiles.
///
/// Both inputs are NCHW `[1, 3, h, w]` in `geometry().input_range`: `original`
/// at native input size and `bicubic` at native output size. The result must be
/// `[1, 3, output_height, output_width]` in `geometry().output_range`.
/// Implementations keep no state between calls.
pub trait TileInference {
    fn geometry(&self) -> ModelGeometry;

    fn infer(&mut self, original: &Array4<f32>, bicubic: &Array4<f32>) -> Result<Array4<f32>>;
}

/// An in-painting model. Inputs and output are in `geometry().layout`.
///
/// `masked` carries the image with holes painted white, `mask` is
/// single-channel with 1.0 at holes.
pub trait InpaintInference {
    fn geometry(&self) -> ModelGeometry;

    fn infer(&mut self, masked: &Array4<f32>, mask: &Array4<f32>) -> Result<Array4<f32>>;
}
