//! Model input/output discovery and geometry resolution.

use anyhow::{bail, Context, Result};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::ValueType;
use serde::{Deserialize, Serialize};

use crate::error::Axis;
use crate::geometry::{scale_dimension, ModelGeometry, PixelRange, TensorLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    F32,
    F16,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub element: ElementKind,
    /// Dimensions as declared by the model; `-1` marks a dynamic axis.
    pub shape: Vec<i64>,
}

impl TensorSpec {
    pub fn layout(&self) -> Option<TensorLayout> {
        TensorLayout::detect(&self.shape)
    }

    /// Static `(width, height)`, if both spatial axes are fixed.
    pub fn spatial_size(&self) -> Option<(u32, u32)> {
        let (h_axis, w_axis) = self.layout()?.spatial_axes();
        let h = u32::try_from(self.shape[h_axis]).ok().filter(|v| *v > 0)?;
        let w = u32::try_from(self.shape[w_axis]).ok().filter(|v| *v > 0)?;
        Some((w, h))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIo {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

/// Values the model does not declare, supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryOverrides {
    pub input_size: Option<(u32, u32)>,
    pub upsample: Option<u32>,
    pub input_range: Option<PixelRange>,
    /// Falls back to the input range.
    pub output_range: Option<PixelRange>,
}

fn scaled(size: (u32, u32), factor: u32) -> Result<(u32, u32)> {
    Ok((
        scale_dimension(Axis::X, size.0, factor)?,
        scale_dimension(Axis::Y, size.1, factor)?,
    ))
}

fn tensor_spec(name: &str, value_type: &ValueType) -> TensorSpec {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => TensorSpec {
            name: name.to_string(),
            element: match ty {
                TensorElementType::Float32 => ElementKind::F32,
                TensorElementType::Float16 => ElementKind::F16,
                _ => ElementKind::Other,
            },
            shape: shape.iter().copied().collect(),
        },
        _ => TensorSpec {
            name: name.to_string(),
            element: ElementKind::Other,
            shape: Vec::new(),
        },
    }
}

pub fn inspect_session(session: &Session) -> ModelIo {
    ModelIo {
        inputs: session
            .inputs()
            .iter()
            .map(|input| tensor_spec(input.name(), input.dtype()))
            .collect(),
        outputs: session
            .outputs()
            .iter()
            .map(|output| tensor_spec(output.name(), output.dtype()))
            .collect(),
    }
}

impl ModelIo {
    /// Image input with the smallest declared area; the low-resolution one
    /// when a model takes both a native and an upsampled image.
    pub fn primary_input(&self) -> Result<&TensorSpec> {
        self.inputs
            .iter()
            .filter(|spec| spec.layout().is_some())
            .min_by_key(|spec| {
                spec.spatial_size()
                    .map(|(w, h)| u64::from(w) * u64::from(h))
                    .unwrap_or(u64::MAX)
            })
            .context("model has no 4-D image input")
    }

    pub fn primary_output(&self) -> Result<&TensorSpec> {
        self.outputs
            .iter()
            .find(|spec| spec.layout().is_some())
            .context("model has no 4-D image output")
    }

    /// Resolve the fixed tile geometry, filling dynamic axes from `overrides`.
    ///
    /// Half precision models default to 0–1 values, single precision to 0–255.
    pub fn geometry(&self, overrides: &GeometryOverrides) -> Result<ModelGeometry> {
        let input = self.primary_input()?;
        let output = self.primary_output()?;
        let layout = input.layout().unwrap_or_default();

        let input_size = match overrides.input_size.or_else(|| input.spatial_size()) {
            Some(size) => size,
            None => bail!(
                "input '{}' has dynamic spatial size {:?}; pass an explicit input size",
                input.name,
                input.shape
            ),
        };

        let output_size = match (overrides.upsample, output.spatial_size()) {
            (Some(factor), _) => scaled(input_size, factor)?,
            (None, Some(size)) if overrides.input_size.is_none() => size,
            (None, Some(size)) => {
                // Input was overridden: keep the declared ratio.
                let declared = input.spatial_size().unwrap_or(input_size);
                let factor = size.0 / declared.0.max(1);
                scaled(input_size, factor)?
            }
            (None, None) => bail!(
                "output '{}' has dynamic spatial size {:?}; pass an explicit upsample factor",
                output.name,
                output.shape
            ),
        };

        let input_range = overrides.input_range.unwrap_or(match input.element {
            ElementKind::F16 => PixelRange::Unit,
            _ => PixelRange::Byte,
        });
        let output_range = overrides.output_range.unwrap_or(input_range);

        Ok(ModelGeometry {
            input_width: input_size.0,
            input_height: input_size.1,
            output_width: output_size.0,
            output_height: output_size.1,
            input_range,
            output_range,
            layout,
        })
    }
}
