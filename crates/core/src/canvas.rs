//! Output canvas receiving the trusted interior of every tile.

use image::RgbImage;
use ndarray::ArrayView4;

use crate::error::TilingError;
use crate::geometry::PixelRange;
use crate::grid::Placement;
use crate::tensor::to_byte;

pub struct OutputCanvas {
    image: RgbImage,
    /// Range of the model outputs being stitched.
    output_range: PixelRange,
}

impl OutputCanvas {
    pub fn new(width: u32, height: u32, output_range: PixelRange) -> Self {
        Self {
            image: RgbImage::new(width, height),
            output_range,
        }
    }

    /// Copy the interior of an NCHW model output to its placement.
    ///
    /// Values are clamped and narrowed to u8 on the way in. Pixels already on
    /// the canvas are overwritten.
    pub fn stitch(
        &mut self,
        tile: ArrayView4<'_, f32>,
        placement: &Placement,
    ) -> Result<(), TilingError> {
        let shape = tile.shape();
        let crop = placement.crop as usize;
        let (w, h) = (placement.width as usize, placement.height as usize);
        let fits_tile = shape[0] == 1
            && shape[1] == 3
            && crop + h <= shape[2]
            && crop + w <= shape[3];
        let (canvas_w, canvas_h) = self.image.dimensions();
        let fits_canvas = placement.dest_x + placement.width <= canvas_w
            && placement.dest_y + placement.height <= canvas_h;

        if !fits_tile || !fits_canvas {
            return Err(TilingError::OutputShapeMismatch {
                expected: vec![1, 3, crop * 2 + h, crop * 2 + w],
                actual: shape.to_vec(),
            });
        }

        for row in 0..h {
            let dest_y = placement.dest_y + row as u32;
            for col in 0..w {
                let dest_x = placement.dest_x + col as u32;
                let pixel = self.image.get_pixel_mut(dest_x, dest_y);
                for c in 0..3 {
                    pixel[c] = to_byte(tile[[0, c, crop + row, crop + col]], self.output_range);
                }
            }
        }
        Ok(())
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array4;

    fn placement(crop: u32, dest: (u32, u32), size: (u32, u32)) -> Placement {
        Placement {
            crop,
            dest_x: dest.0,
            dest_y: dest.1,
            width: size.0,
            height: size.1,
        }
    }

    #[test]
    fn stitch_writes_only_the_interior() {
        let mut canvas = OutputCanvas::new(6, 6, PixelRange::Byte);
        let mut tile = Array4::<f32>::from_elem((1, 3, 4, 4), 10.0);
        tile[[0, 0, 1, 1]] = 200.0;

        canvas.stitch(tile.view(), &placement(1, (2, 3), (2, 2))).unwrap();
        let image = canvas.into_image();

        assert_eq!(image.get_pixel(2, 3), &Rgb([200, 10, 10]));
        assert_eq!(image.get_pixel(3, 4), &Rgb([10, 10, 10]));
        assert_eq!(image.get_pixel(1, 3), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(4, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn later_writes_win() {
        let mut canvas = OutputCanvas::new(4, 1, PixelRange::Unit);
        let first = Array4::<f32>::from_elem((1, 3, 1, 3), 0.2);
        let second = Array4::<f32>::from_elem((1, 3, 1, 3), 0.8);

        canvas.stitch(first.view(), &placement(0, (0, 0), (3, 1))).unwrap();
        canvas.stitch(second.view(), &placement(0, (1, 0), (3, 1))).unwrap();
        let image = canvas.into_image();

        assert_eq!(image.get_pixel(0, 0)[0], 51);
        assert_eq!(image.get_pixel(1, 0)[0], 204);
        assert_eq!(image.get_pixel(3, 0)[0], 204);
    }

    #[test]
    fn stitch_rejects_small_tiles_and_canvas_overflow() {
        let mut canvas = OutputCanvas::new(4, 4, PixelRange::Byte);
        let small = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(matches!(
            canvas.stitch(small.view(), &placement(1, (0, 0), (2, 2))),
            Err(TilingError::OutputShapeMismatch { .. })
        ));

        let tile = Array4::<f32>::zeros((1, 3, 3, 3));
        assert!(canvas
            .stitch(tile.view(), &placement(0, (2, 2), (3, 3)))
            .is_err());
    }
}
