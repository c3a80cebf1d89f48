//! In-painting: hole masks, masked model input, and compositing the result.

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use tracing::{debug, info};

use crate::inference::InpaintInference;
use crate::tensor::{mask_to_tensor, rgb_to_tensor, tensor_to_rgb};

const HOLE: Luma<u8> = Luma([255]);

/// Axis-aligned hole `x,y,w,h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Thick line hole `x0,y0,x1,y1,thickness`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stroke {
    pub from: (u32, u32),
    pub to: (u32, u32),
    pub thickness: u32,
}

fn parse_fields<const N: usize>(s: &str, what: &str) -> Result<[u32; N]> {
    let fields: Vec<&str> = s.split(',').map(str::trim).collect();
    if fields.len() != N {
        bail!("{what} needs {N} comma-separated integers, got '{s}'");
    }
    let mut values = [0u32; N];
    for (slot, field) in values.iter_mut().zip(fields) {
        *slot = field
            .parse()
            .with_context(|| format!("invalid {what} value '{field}' in '{s}'"))?;
    }
    Ok(values)
}

impl FromStr for Rect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let [x, y, width, height] = parse_fields::<4>(s, "rect")?;
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }
}

impl FromStr for Stroke {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let [x0, y0, x1, y1, thickness] = parse_fields::<5>(s, "stroke")?;
        if thickness == 0 {
            bail!("stroke thickness must be positive in '{s}'");
        }
        Ok(Self {
            from: (x0, y0),
            to: (x1, y1),
            thickness,
        })
    }
}

/// Accumulates holes into a mask the size of the source image.
pub struct MaskBuilder {
    mask: GrayImage,
}

impl MaskBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
        }
    }

    /// Anything brighter than mid-gray in `path` becomes a hole.
    pub fn from_file(path: &Path, width: u32, height: u32) -> Result<Self> {
        let loaded = image::open(path)
            .with_context(|| format!("failed to load mask image: {}", path.display()))?
            .to_luma8();
        let loaded = if loaded.dimensions() == (width, height) {
            loaded
        } else {
            imageops::resize(&loaded, width, height, FilterType::Nearest)
        };

        let mut builder = Self::new(width, height);
        for (x, y, pixel) in loaded.enumerate_pixels() {
            if pixel[0] > 127 {
                builder.mask.put_pixel(x, y, HOLE);
            }
        }
        Ok(builder)
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        let (w, h) = self.mask.dimensions();
        let x_end = rect.x.saturating_add(rect.width).min(w);
        let y_end = rect.y.saturating_add(rect.height).min(h);
        for y in rect.y.min(h)..y_end {
            for x in rect.x.min(w)..x_end {
                self.mask.put_pixel(x, y, HOLE);
            }
        }
        self
    }

    /// Every pixel whose center lies within `thickness / 2` of the segment.
    pub fn stroke(mut self, stroke: Stroke) -> Self {
        let (w, h) = self.mask.dimensions();
        if w == 0 || h == 0 {
            return self;
        }
        let radius = stroke.thickness as f32 / 2.0;
        let (ax, ay) = (stroke.from.0 as f32, stroke.from.1 as f32);
        let (bx, by) = (stroke.to.0 as f32, stroke.to.1 as f32);
        let (dx, dy) = (bx - ax, by - ay);
        let len_sq = dx * dx + dy * dy;

        let min_x = (ax.min(bx) - radius).floor().max(0.0) as u32;
        let min_y = (ay.min(by) - radius).floor().max(0.0) as u32;
        let max_x = ((ax.max(bx) + radius).ceil() as u32).min(w - 1);
        let max_y = ((ay.max(by) + radius).ceil() as u32).min(h - 1);

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let (px, py) = (x as f32, y as f32);
                let t = if len_sq == 0.0 {
                    0.0
                } else {
                    (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
                };
                let (cx, cy) = (ax + t * dx - px, ay + t * dy - py);
                if cx * cx + cy * cy <= radius * radius {
                    self.mask.put_pixel(x, y, HOLE);
                }
            }
        }
        self
    }

    pub fn build(self) -> GrayImage {
        self.mask
    }
}

pub fn hole_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] != 0).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InpaintOptions {
    /// Resize the result back to the source size instead of the model size.
    pub restore_size: bool,
    /// Keep original pixels outside the holes.
    pub composite: bool,
}

impl Default for InpaintOptions {
    fn default() -> Self {
        Self {
            restore_size: true,
            composite: true,
        }
    }
}

/// Paint holes white so the model sees them as missing.
pub fn apply_mask(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut masked = image.clone();
    for (pixel, hole) in masked.pixels_mut().zip(mask.pixels()) {
        if hole[0] != 0 {
            *pixel = image::Rgb([255, 255, 255]);
        }
    }
    masked
}

pub fn inpaint(
    inference: &mut dyn InpaintInference,
    image: &RgbImage,
    mask: &GrayImage,
    options: &InpaintOptions,
) -> Result<RgbImage> {
    if image.dimensions() != mask.dimensions() {
        bail!(
            "mask is {}x{} but image is {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        );
    }

    let geometry = inference.geometry();
    let (in_w, in_h) = (geometry.input_width, geometry.input_height);
    info!(
        source_w = image.width(),
        source_h = image.height(),
        model_w = in_w,
        model_h = in_h,
        holes = hole_count(mask),
        "Starting in-painting"
    );

    let small_image = imageops::resize(image, in_w, in_h, FilterType::CatmullRom);
    let small_mask = imageops::resize(mask, in_w, in_h, FilterType::Nearest);
    let masked = apply_mask(&small_image, &small_mask);

    let masked_tensor = rgb_to_tensor(&masked, geometry.input_range, geometry.layout);
    let mask_tensor = mask_to_tensor(&small_mask, geometry.layout);
    let output = inference
        .infer(&masked_tensor, &mask_tensor)
        .context("in-painting inference failed")?;
    let painted = tensor_to_rgb(output.view(), geometry.output_range, geometry.layout)?;
    debug!(
        out_w = painted.width(),
        out_h = painted.height(),
        "In-painting inference done"
    );

    let (reference, reference_mask) = if options.restore_size {
        (image.clone(), mask.clone())
    } else {
        (small_image, small_mask)
    };
    let (ref_w, ref_h) = reference.dimensions();
    let painted = if painted.dimensions() == (ref_w, ref_h) {
        painted
    } else {
        imageops::resize(&painted, ref_w, ref_h, FilterType::CatmullRom)
    };

    if !options.composite {
        return Ok(painted);
    }

    let mut result = reference;
    for ((pixel, fill), hole) in result
        .pixels_mut()
        .zip(painted.pixels())
        .zip(reference_mask.pixels())
    {
        if hole[0] != 0 {
            *pixel = *fill;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ModelGeometry, PixelRange, TensorLayout};
    use image::Rgb;
    use ndarray::Array4;

    /// Fills holes with pure red, passes everything else through.
    struct RedFill {
        geometry: ModelGeometry,
    }

    impl InpaintInference for RedFill {
        fn geometry(&self) -> ModelGeometry {
            self.geometry
        }

        fn infer(&mut self, masked: &Array4<f32>, mask: &Array4<f32>) -> Result<Array4<f32>> {
            let (input, output) = (self.geometry.input_range, self.geometry.output_range);
            let mut out = masked.mapv(|v| v / input.white() * output.white());
            let shape = masked.shape().to_vec();
            for y in 0..shape[1] {
                for x in 0..shape[2] {
                    if mask[[0, y, x, 0]] > 0.5 {
                        assert_eq!(masked[[0, y, x, 0]], input.white());
                        out[[0, y, x, 0]] = output.white();
                        out[[0, y, x, 1]] = 0.0;
                        out[[0, y, x, 2]] = 0.0;
                    }
                }
            }
            Ok(out)
        }
    }

    fn nhwc_model(w: u32, h: u32) -> RedFill {
        let mut geometry = ModelGeometry::new((w, h), (w, h), PixelRange::Byte);
        geometry.layout = TensorLayout::Nhwc;
        RedFill { geometry }
    }

    #[test]
    fn parse_rect_and_stroke() {
        assert_eq!(
            "1, 2,30,40".parse::<Rect>().unwrap(),
            Rect {
                x: 1,
                y: 2,
                width: 30,
                height: 40
            }
        );
        let stroke: Stroke = "0,0,10,10,3".parse().unwrap();
        assert_eq!(stroke.thickness, 3);
        assert!("1,2,3".parse::<Rect>().is_err());
        assert!("a,2,3,4".parse::<Rect>().is_err());
        assert!("0,0,1,1,0".parse::<Stroke>().is_err());
    }

    #[test]
    fn rect_is_clipped_to_the_image() {
        let mask = MaskBuilder::new(10, 10)
            .rect(Rect {
                x: 8,
                y: 8,
                width: 5,
                height: 5,
            })
            .build();
        assert_eq!(hole_count(&mask), 4);
    }

    #[test]
    fn horizontal_stroke_has_the_requested_thickness() {
        let mask = MaskBuilder::new(20, 20)
            .stroke(Stroke {
                from: (2, 10),
                to: (17, 10),
                thickness: 3,
            })
            .build();
        for x in 2..=17 {
            assert_eq!(mask.get_pixel(x, 9)[0], 255);
            assert_eq!(mask.get_pixel(x, 10)[0], 255);
            assert_eq!(mask.get_pixel(x, 11)[0], 255);
            assert_eq!(mask.get_pixel(x, 13)[0], 0);
        }
        assert_eq!(mask.get_pixel(0, 10)[0], 0);
    }

    #[test]
    fn apply_mask_whitens_holes() {
        let image = RgbImage::from_pixel(3, 1, Rgb([10, 20, 30]));
        let mut mask = GrayImage::new(3, 1);
        mask.put_pixel(1, 0, HOLE);
        let masked = apply_mask(&image, &mask);
        assert_eq!(masked.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(masked.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn inpaint_replaces_only_holes() {
        let image = RgbImage::from_pixel(16, 12, Rgb([40, 80, 120]));
        let mask = MaskBuilder::new(16, 12)
            .rect(Rect {
                x: 4,
                y: 4,
                width: 4,
                height: 4,
            })
            .build();
        let mut model = nhwc_model(16, 12);

        let result = inpaint(&mut model, &image, &mask, &InpaintOptions::default()).unwrap();
        assert_eq!(result.dimensions(), (16, 12));
        assert_eq!(result.get_pixel(5, 5), &Rgb([255, 0, 0]));
        assert_eq!(result.get_pixel(0, 0), &Rgb([40, 80, 120]));
        assert_eq!(result.get_pixel(8, 8), &Rgb([40, 80, 120]));
    }

    #[test]
    fn byte_input_unit_output_model_is_rescaled() {
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        let mask = MaskBuilder::new(8, 8)
            .rect(Rect {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
            })
            .build();
        let mut model = nhwc_model(8, 8);
        model.geometry.output_range = PixelRange::Unit;
        let options = InpaintOptions {
            restore_size: true,
            composite: false,
        };

        let result = inpaint(&mut model, &image, &mask, &options).unwrap();
        assert_eq!(result.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(result.get_pixel(5, 5), &Rgb([200, 100, 50]));
    }

    #[test]
    fn keep_model_size_returns_model_resolution() {
        let image = RgbImage::from_pixel(32, 24, Rgb([1, 2, 3]));
        let mask = MaskBuilder::new(32, 24)
            .rect(Rect {
                x: 0,
                y: 0,
                width: 8,
                height: 8,
            })
            .build();
        let mut model = nhwc_model(16, 12);
        let options = InpaintOptions {
            restore_size: false,
            composite: true,
        };

        let result = inpaint(&mut model, &image, &mask, &options).unwrap();
        assert_eq!(result.dimensions(), (16, 12));
        assert_eq!(result.get_pixel(1, 1), &Rgb([255, 0, 0]));
        assert_eq!(result.get_pixel(10, 10), &Rgb([1, 2, 3]));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let image = RgbImage::new(8, 8);
        let mask = GrayImage::new(4, 4);
        let mut model = nhwc_model(8, 8);
        assert!(inpaint(&mut model, &image, &mask, &InpaintOptions::default()).is_err());
    }

    #[test]
    fn mask_file_is_thresholded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let mut source = GrayImage::new(4, 4);
        source.put_pixel(0, 0, Luma([200]));
        source.put_pixel(1, 0, Luma([100]));
        source.save(&path).unwrap();

        let mask = MaskBuilder::from_file(&path, 4, 4).unwrap().build();
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
        assert_eq!(mask.get_pixel(1, 0)[0], 0);
        assert_eq!(hole_count(&mask), 1);
    }
}
