//! ONNX Runtime implementations of the inference seams.
//!
//! Supports FP32 and FP16 models (converted with `half` on the way in and
//! out) in NCHW or NHWC layout. Super-resolution models take either just the
//! low-resolution tile or the tile plus its bicubic upsample.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use half::f16;
use ndarray::{Array4, Ix4};
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::debug;

use crate::backend::{build_session, SessionConfig};
use crate::geometry::{ModelGeometry, TensorLayout};
use crate::inference::{InpaintInference, TileInference};
use crate::model_io::{inspect_session, ElementKind, GeometryOverrides, ModelIo, TensorSpec};
use crate::tensor::{f16_to_f32, f32_to_f16, relayout};

/// A loaded session plus its discovered IO.
pub struct OnnxModel {
    session: Arc<Mutex<Session>>,
    io: ModelIo,
}

impl OnnxModel {
    pub fn load(config: &SessionConfig<'_>) -> Result<Self> {
        debug!(
            model = %config.model_path.display(),
            backend = %config.backend,
            "Loading ONNX model"
        );
        let session = build_session(config)?;
        let io = inspect_session(&session);
        debug!(inputs = ?io.inputs, outputs = ?io.outputs, "Detected model IO");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            io,
        })
    }

    pub fn io(&self) -> &ModelIo {
        &self.io
    }

    /// Run with NCHW/NHWC f32 inputs already in the model's layout.
    fn run(&self, inputs: &[(&TensorSpec, &Array4<f32>)], output: &TensorSpec) -> Result<Array4<f32>> {
        let values = inputs
            .iter()
            .map(|(spec, tensor)| to_input_value(tensor, spec.element))
            .collect::<Result<Vec<_>>>()?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session mutex poisoned"))?;

        let outputs = match (inputs, values.as_slice()) {
            ([(a, _)], [va]) => session.run(ort::inputs![a.name.as_str() => va])?,
            ([(a, _), (b, _)], [va, vb]) => {
                session.run(ort::inputs![a.name.as_str() => va, b.name.as_str() => vb])?
            }
            _ => bail!("unsupported number of model inputs: {}", inputs.len()),
        };

        let value = &outputs[output.name.as_str()];
        let array = match output.element {
            ElementKind::F16 => f16_to_f32(value.try_extract_array::<f16>()?)?,
            _ => value.try_extract_array::<f32>()?.to_owned(),
        };
        array
            .into_dimensionality::<Ix4>()
            .with_context(|| format!("output '{}' is not a 4-D tensor", output.name))
    }
}

fn to_input_value(tensor: &Array4<f32>, element: ElementKind) -> Result<DynValue> {
    let value = match element {
        ElementKind::F16 => Tensor::from_array(f32_to_f16(tensor)?)?.into_dyn(),
        ElementKind::F32 => Tensor::from_array(tensor.as_standard_layout().into_owned())?.into_dyn(),
        ElementKind::Other => bail!("only f32 and f16 model inputs are supported"),
    };
    Ok(value)
}

fn channels(spec: &TensorSpec) -> Option<i64> {
    match spec.layout()? {
        TensorLayout::Nchw => spec.shape.get(1).copied(),
        TensorLayout::Nhwc => spec.shape.get(3).copied(),
    }
}

/// `(low-resolution input, optional bicubic input)` of a super-resolution model.
pub fn super_resolution_inputs(io: &ModelIo) -> Result<(TensorSpec, Option<TensorSpec>)> {
    let original = io.primary_input()?.clone();
    let bicubic = io
        .inputs
        .iter()
        .find(|spec| spec.name != original.name && channels(spec) == Some(3))
        .cloned();
    if io.inputs.len() > 2 {
        bail!(
            "super-resolution models take one or two inputs, this one has {}",
            io.inputs.len()
        );
    }
    Ok((original, bicubic))
}

/// `(image input, mask input)` of an in-painting model.
pub fn inpainting_inputs(io: &ModelIo) -> Result<(TensorSpec, TensorSpec)> {
    let image = io
        .inputs
        .iter()
        .find(|spec| channels(spec) == Some(3))
        .context("in-painting model has no 3-channel image input")?;
    let mask = io
        .inputs
        .iter()
        .find(|spec| channels(spec) == Some(1))
        .context("in-painting model has no 1-channel mask input")?;
    Ok((image.clone(), mask.clone()))
}

pub struct OnnxSuperResolution {
    model: OnnxModel,
    geometry: ModelGeometry,
    original: TensorSpec,
    bicubic: Option<TensorSpec>,
    output: TensorSpec,
}

impl OnnxSuperResolution {
    pub fn load(config: &SessionConfig<'_>, overrides: &GeometryOverrides) -> Result<Self> {
        let model = OnnxModel::load(config)?;
        let geometry = model.io().geometry(overrides)?;
        let (original, bicubic) = super_resolution_inputs(model.io())?;
        let output = model.io().primary_output()?.clone();

        debug!(
            input = %original.name,
            bicubic = bicubic.as_ref().map(|s| s.name.as_str()).unwrap_or("<none>"),
            output = %output.name,
            ?geometry,
            "Super-resolution model ready"
        );

        Ok(Self {
            model,
            geometry,
            original,
            bicubic,
            output,
        })
    }
}

impl TileInference for OnnxSuperResolution {
    fn geometry(&self) -> ModelGeometry {
        self.geometry
    }

    fn infer(&mut self, original: &Array4<f32>, bicubic: &Array4<f32>) -> Result<Array4<f32>> {
        let layout = self.geometry.layout;
        let original = relayout(original.clone(), TensorLayout::Nchw, layout);

        let output = match &self.bicubic {
            Some(bicubic_spec) => {
                let bicubic = relayout(bicubic.clone(), TensorLayout::Nchw, layout);
                self.model.run(
                    &[(&self.original, &original), (bicubic_spec, &bicubic)],
                    &self.output,
                )?
            }
            None => self.model.run(&[(&self.original, &original)], &self.output)?,
        };

        Ok(relayout(output, layout, TensorLayout::Nchw))
    }
}

pub struct OnnxInpainting {
    model: OnnxModel,
    geometry: ModelGeometry,
    image: TensorSpec,
    mask: TensorSpec,
    output: TensorSpec,
}

impl OnnxInpainting {
    pub fn load(config: &SessionConfig<'_>, overrides: &GeometryOverrides) -> Result<Self> {
        let model = OnnxModel::load(config)?;
        let (image, mask) = inpainting_inputs(model.io())?;
        let geometry = model.io().geometry(&GeometryOverrides {
            upsample: overrides.upsample.or(Some(1)),
            ..*overrides
        })?;
        let output = model.io().primary_output()?.clone();

        Ok(Self {
            model,
            geometry,
            image,
            mask,
            output,
        })
    }
}

impl InpaintInference for OnnxInpainting {
    fn geometry(&self) -> ModelGeometry {
        self.geometry
    }

    fn infer(&mut self, masked: &Array4<f32>, mask: &Array4<f32>) -> Result<Array4<f32>> {
        self.model
            .run(&[(&self.image, masked), (&self.mask, mask)], &self.output)
    }
}
