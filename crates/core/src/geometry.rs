//! Model geometry: native input/output sizes, pixel range and tensor layout.

use serde::{Deserialize, Serialize};

use crate::error::{Axis, TilingError};

/// Value range of a model tensor.
///
/// Real-ESRGAN style FP32 exports work in 0–255, most FP16 exports in 0–1.
/// Some models read 0–255 and write 0–1, so inputs and outputs are tracked
/// separately in [`ModelGeometry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelRange {
    #[default]
    Unit,
    Byte,
}

impl PixelRange {
    /// Multiplier applied to a u8 sample to get a model value.
    pub fn from_byte_scale(self) -> f32 {
        match self {
            Self::Unit => 1.0 / 255.0,
            Self::Byte => 1.0,
        }
    }

    /// Multiplier applied to a model value to get back to 0–255.
    pub fn to_byte_scale(self) -> f32 {
        match self {
            Self::Unit => 255.0,
            Self::Byte => 1.0,
        }
    }

    /// Model value of a fully white sample.
    pub fn white(self) -> f32 {
        match self {
            Self::Unit => 1.0,
            Self::Byte => 255.0,
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "byte" | "255" | "0-255" => Self::Byte,
            _ => Self::Unit,
        }
    }
}

/// Memory order of a 4-D image tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
}

impl TensorLayout {
    /// Guess the layout of a `[N, ?, ?, ?]` shape from where the channel axis sits.
    ///
    /// Channel axes are 1 or 3 wide. Dynamic dimensions (`<= 0`) never match.
    pub fn detect(shape: &[i64]) -> Option<Self> {
        if shape.len() != 4 {
            return None;
        }
        let is_channel = |d: i64| d == 1 || d == 3;
        match (is_channel(shape[1]), is_channel(shape[3])) {
            (true, false) => Some(Self::Nchw),
            (false, true) => Some(Self::Nhwc),
            // [1, 3, 3, 3] and friends: NCHW is the ONNX convention.
            (true, true) => Some(Self::Nchw),
            (false, false) => None,
        }
    }

    /// `(height, width)` positions in a 4-D shape.
    pub fn spatial_axes(self) -> (usize, usize) {
        match self {
            Self::Nchw => (2, 3),
            Self::Nhwc => (1, 2),
        }
    }

    pub fn shape(self, channels: usize, height: usize, width: usize) -> [usize; 4] {
        match self {
            Self::Nchw => [1, channels, height, width],
            Self::Nhwc => [1, height, width, channels],
        }
    }
}

/// Fixed spatial contract of a tile model, discovered when the model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelGeometry {
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    /// Scale the model reads its inputs in.
    pub input_range: PixelRange,
    /// Scale the model writes its output in.
    pub output_range: PixelRange,
    pub layout: TensorLayout,
}

/// `size * factor`, or a configuration error when it does not fit in u32.
pub fn scale_dimension(axis: Axis, size: u32, factor: u32) -> Result<u32, TilingError> {
    size.checked_mul(factor)
        .ok_or(TilingError::DimensionOverflow { axis, size, factor })
}

impl ModelGeometry {
    /// Geometry whose inputs and outputs share one value range.
    pub fn new(input: (u32, u32), output: (u32, u32), range: PixelRange) -> Self {
        Self {
            input_width: input.0,
            input_height: input.1,
            output_width: output.0,
            output_height: output.1,
            input_range: range,
            output_range: range,
            layout: TensorLayout::Nchw,
        }
    }

    pub fn with_output_range(mut self, range: PixelRange) -> Self {
        self.output_range = range;
        self
    }

    /// Geometry of a model that upsamples a `w x h` input by an integer factor.
    pub fn with_upsample(
        input_width: u32,
        input_height: u32,
        factor: u32,
    ) -> Result<Self, TilingError> {
        let output = (
            scale_dimension(Axis::X, input_width, factor)?,
            scale_dimension(Axis::Y, input_height, factor)?,
        );
        Ok(Self::new((input_width, input_height), output, PixelRange::Unit))
    }

    /// Integer ratio between native output and input. Must agree on both axes.
    pub fn upsample_factor(&self) -> Result<u32, TilingError> {
        let anisotropic = || TilingError::AnisotropicModel {
            input_w: self.input_width,
            input_h: self.input_height,
            output_w: self.output_width,
            output_h: self.output_height,
        };

        if self.input_width == 0 || self.input_height == 0 {
            return Err(anisotropic());
        }
        if self.output_width % self.input_width != 0 || self.output_height % self.input_height != 0
        {
            return Err(anisotropic());
        }

        let fx = self.output_width / self.input_width;
        let fy = self.output_height / self.input_height;
        if fx != fy || fx == 0 {
            return Err(anisotropic());
        }
        Ok(fx)
    }
}
