//! Tiled image super-resolution and in-painting on top of ONNX Runtime.
//!
//! The source image is cut into overlapping model-sized tiles
//! ([`grid::TilePlan`]), each tile is run through a [`inference::TileInference`],
//! and the inner region of every result is stitched into an output canvas.

pub mod backend;
pub mod canvas;
pub mod compositor;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod image_io;
pub mod inference;
pub mod inpaint;
pub mod logging;
pub mod model_io;
pub mod onnx;
pub mod runtime;
pub mod tensor;
pub mod tile;

pub use compositor::{TileCompositor, TileProgress};
pub use error::TilingError;
pub use geometry::{ModelGeometry, PixelRange, TensorLayout};
pub use grid::{EdgePolicy, TilePlan, TilingSettings};
pub use inference::{InpaintInference, TileInference};
