use anyhow::Result;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use tempfile::tempdir;
use tessera_core::image_io::{load_image, save_image};
use tessera_core::{
    EdgePolicy, ModelGeometry, PixelRange, TileCompositor, TileInference, TilePlan,
    TilingError, TilingSettings,
};

/// Pixel-replicating upscaler over the low-resolution input.
struct Replicate {
    geometry: ModelGeometry,
}

impl TileInference for Replicate {
    fn geometry(&self) -> ModelGeometry {
        self.geometry
    }

    fn infer(&mut self, original: &Array4<f32>, _bicubic: &Array4<f32>) -> Result<Array4<f32>> {
        let g = self.geometry;
        let f = (g.output_width / g.input_width) as usize;
        let shape = (1, 3, g.output_height as usize, g.output_width as usize);
        Ok(Array4::from_shape_fn(shape, |(_, c, y, x)| {
            original[[0, c, y / f, x / f]]
        }))
    }
}

fn noise(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let v = x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503));
        Rgb([(v >> 3) as u8, (v >> 11) as u8, (v >> 19) as u8])
    })
}

#[test]
fn aligned_run_covers_the_whole_source_through_png() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.png");
    let output = dir.path().join("out/upscaled.png");
    save_image(&input, &noise(100, 73), 95).unwrap();

    let source = load_image(input.to_str().unwrap()).unwrap();
    let mut model = Replicate {
        geometry: ModelGeometry::new((32, 24), (96, 72), PixelRange::Unit),
    };
    let settings = TilingSettings {
        crop_factor: 1,
        border_lines: 4,
        edge_policy: EdgePolicy::Align,
    };
    let upscaled = TileCompositor::new(&mut model, settings).run(&source).unwrap();
    save_image(&output, &upscaled, 95).unwrap();

    let reloaded = load_image(output.to_str().unwrap()).unwrap();
    assert_eq!(reloaded.dimensions(), ((100 - 8) * 3, (73 - 8) * 3));
    for (x, y, pixel) in reloaded.enumerate_pixels() {
        assert_eq!(pixel, source.get_pixel(x / 3 + 4, y / 3 + 4), "({x}, {y})");
    }
}

#[test]
fn plan_matches_the_documented_scenario() {
    let geometry = ModelGeometry::with_upsample(30, 30, 2).unwrap();
    let discard = TilingSettings {
        crop_factor: 2,
        border_lines: 5,
        edge_policy: EdgePolicy::Discard,
    };
    let align = TilingSettings {
        edge_policy: EdgePolicy::Align,
        ..discard
    };

    let plan = TilePlan::new(100, 100, &geometry, &align).unwrap();
    assert_eq!(plan.xs, vec![0, 40]);
    assert_eq!(plan.effective_upsample, 1);
    assert_eq!((plan.canvas_width, plan.canvas_height), (90, 90));

    let plan = TilePlan::new(100, 100, &geometry, &discard).unwrap();
    assert_eq!(plan.xs, vec![0]);
    assert_eq!(plan.canvas_width, 50);

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["tile_width"], 60);
    assert_eq!(json["xs"], serde_json::json!([0]));
}

#[test]
fn oversized_tiles_fail_before_any_inference() {
    let mut model = Replicate {
        geometry: ModelGeometry::with_upsample(64, 64, 2).unwrap(),
    };
    let err = TileCompositor::new(&mut model, TilingSettings::default())
        .run(&noise(100, 100))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TilingError>(),
        Some(TilingError::TileExceedsSource { .. })
    ));
}
