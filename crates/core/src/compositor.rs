//! Tiled super-resolution: plan, infer tile by tile, stitch interiors.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::canvas::OutputCanvas;
use crate::error::TilingError;
use crate::grid::{TilePlan, TilingSettings};
use crate::inference::TileInference;
use crate::tile::prepare_tile;

/// Reported once per finished tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileProgress {
    /// Zero-based position in traversal order.
    pub index: usize,
    pub total: usize,
    pub x: u32,
    pub y: u32,
    /// Time spent inside the inference call for this tile.
    pub inference: Duration,
    /// Time since the run started.
    pub elapsed: Duration,
}

impl TileProgress {
    pub fn completed(&self) -> usize {
        self.index + 1
    }
}

pub type ProgressCallback = Box<dyn FnMut(&TileProgress) + Send>;

pub struct TileCompositor<'a> {
    inference: &'a mut dyn TileInference,
    settings: TilingSettings,
    progress: Option<ProgressCallback>,
    cancel: Option<CancellationToken>,
}

impl<'a> TileCompositor<'a> {
    pub fn new(inference: &'a mut dyn TileInference, settings: TilingSettings) -> Self {
        Self {
            inference,
            settings,
            progress: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Checked before every tile; a cancelled run yields [`TilingError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn plan(&self, source_width: u32, source_height: u32) -> Result<TilePlan, TilingError> {
        TilePlan::new(
            source_width,
            source_height,
            &self.inference.geometry(),
            &self.settings,
        )
    }

    /// Upscale `source`. Nothing is returned unless every tile succeeded.
    pub fn run(&mut self, source: &RgbImage) -> Result<RgbImage> {
        let geometry = self.inference.geometry();
        let plan = self.plan(source.width(), source.height())?;
        let total = plan.tile_count();
        let (out_w, out_h) = plan.output_tile_size();
        let expected_shape = [1, 3, out_h as usize, out_w as usize];

        info!(
            source_w = source.width(),
            source_h = source.height(),
            tile_w = plan.tile_width,
            tile_h = plan.tile_height,
            border_lines = plan.border_lines,
            crop_factor = plan.crop_factor,
            upsample = plan.effective_upsample,
            tiles = total,
            canvas_w = plan.canvas_width,
            canvas_h = plan.canvas_height,
            "Starting tiled super-resolution"
        );

        let mut canvas =
            OutputCanvas::new(plan.canvas_width, plan.canvas_height, geometry.output_range);
        let started = Instant::now();

        for tile in plan.tiles() {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(TilingError::Cancelled {
                    completed: tile.index,
                    total,
                }
                .into());
            }

            let inputs = prepare_tile(source, &plan, &tile, &geometry)?;

            let inference_started = Instant::now();
            let output = self
                .inference
                .infer(&inputs.original, &inputs.bicubic)
                .with_context(|| {
                    format!(
                        "inference failed on tile {}/{} at ({}, {})",
                        tile.index + 1,
                        total,
                        tile.x,
                        tile.y
                    )
                })?;
            let inference = inference_started.elapsed();

            if output.shape() != &expected_shape[..] {
                return Err(TilingError::OutputShapeMismatch {
                    expected: expected_shape.to_vec(),
                    actual: output.shape().to_vec(),
                }
                .into());
            }

            canvas.stitch(output.view(), &plan.placement(&tile))?;

            let progress = TileProgress {
                index: tile.index,
                total,
                x: tile.x,
                y: tile.y,
                inference,
                elapsed: started.elapsed(),
            };
            debug!(
                tile = progress.completed(),
                total,
                x = tile.x,
                y = tile.y,
                inference_ms = format!("{:.1}", inference.as_secs_f64() * 1000.0),
                "Tile done"
            );
            if let Some(callback) = self.progress.as_mut() {
                callback(&progress);
            }
        }

        info!(
            tiles = total,
            elapsed_secs = format!("{:.2}", started.elapsed().as_secs_f64()),
            "Tiled super-resolution finished"
        );
        Ok(canvas.into_image())
    }
}
