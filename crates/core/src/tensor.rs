//! Conversions between interleaved u8 images and 4-D float tensors.

use anyhow::{bail, Result};
use half::f16;
use half::slice::HalfFloatSliceExt;
use image::{GrayImage, RgbImage};
use ndarray::{Array4, ArrayD, ArrayView4, ArrayViewD, IxDyn};

use crate::geometry::{PixelRange, TensorLayout};

/// Scale a model value back to 0–255, round, clamp, narrow.
#[inline]
pub fn to_byte(value: f32, range: PixelRange) -> u8 {
    let scaled = (value * range.to_byte_scale()).round();
    // NaN clamps to 0 through the `as` cast.
    scaled.clamp(0.0, 255.0) as u8
}

/// RGB image → `[1,3,H,W]` or `[1,H,W,3]` tensor in the model's value range.
pub fn rgb_to_tensor(image: &RgbImage, range: PixelRange, layout: TensorLayout) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let scale = range.from_byte_scale();
    let [n, d1, d2, d3] = layout.shape(3, h, w);
    let mut tensor = Array4::<f32>::zeros((n, d1, d2, d3));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = f32::from(pixel[c]) * scale;
            match layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
            }
        }
    }
    tensor
}

/// Hole mask → single-channel tensor holding 1.0 at holes and 0.0 elsewhere.
pub fn mask_to_tensor(mask: &GrayImage, layout: TensorLayout) -> Array4<f32> {
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let [n, d1, d2, d3] = layout.shape(1, h, w);
    let mut tensor = Array4::<f32>::zeros((n, d1, d2, d3));

    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        let (x, y) = (x as usize, y as usize);
        match layout {
            TensorLayout::Nchw => tensor[[0, 0, y, x]] = 1.0,
            TensorLayout::Nhwc => tensor[[0, y, x, 0]] = 1.0,
        }
    }
    tensor
}

/// 3-channel tensor → RGB image, clamping every sample.
pub fn tensor_to_rgb(
    tensor: ArrayView4<'_, f32>,
    range: PixelRange,
    layout: TensorLayout,
) -> Result<RgbImage> {
    let shape = tensor.shape();
    let (channels, h, w) = match layout {
        TensorLayout::Nchw => (shape[1], shape[2], shape[3]),
        TensorLayout::Nhwc => (shape[3], shape[1], shape[2]),
    };
    if shape[0] != 1 || channels != 3 {
        bail!("expected a single 3-channel image tensor, got shape {shape:?}");
    }

    let mut image = RgbImage::new(w as u32, h as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = match layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]],
                TensorLayout::Nhwc => tensor[[0, y, x, c]],
            };
            pixel[c] = to_byte(value, range);
        }
    }
    Ok(image)
}

/// NCHW ↔ NHWC. A no-op view change when the layouts match.
pub fn relayout(tensor: Array4<f32>, from: TensorLayout, to: TensorLayout) -> Array4<f32> {
    match (from, to) {
        (TensorLayout::Nchw, TensorLayout::Nhwc) => {
            tensor.permuted_axes([0, 2, 3, 1]).as_standard_layout().into_owned()
        }
        (TensorLayout::Nhwc, TensorLayout::Nchw) => {
            tensor.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned()
        }
        _ => tensor,
    }
}

pub fn f32_to_f16(tensor: &Array4<f32>) -> Result<ArrayD<f16>> {
    let standard = tensor.as_standard_layout();
    let Some(values) = standard.as_slice() else {
        bail!("tensor is not contiguous after standardizing layout");
    };
    let mut halves = vec![f16::ZERO; values.len()];
    halves.convert_from_f32_slice(values);
    Ok(ArrayD::from_shape_vec(IxDyn(tensor.shape()), halves)?)
}

pub fn f16_to_f32(tensor: ArrayViewD<'_, f16>) -> Result<ArrayD<f32>> {
    let standard = tensor.as_standard_layout();
    let Some(values) = standard.as_slice() else {
        bail!("tensor is not contiguous after standardizing layout");
    };
    let mut floats = vec![0.0f32; values.len()];
    values.convert_to_f32_slice(&mut floats);
    Ok(ArrayD::from_shape_vec(IxDyn(tensor.shape()), floats)?)
}
