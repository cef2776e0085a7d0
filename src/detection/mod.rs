//! Per-ROI raster materialization and nucleus segmentation.

pub mod inference;
pub mod mask;
pub mod roi;

pub use inference::{CommandEngine, PredictOptions, SegmentationEngine, TileInference, TileOutput};
pub use mask::TileMasking;
pub use roi::{RoiFetcher, RoiTiles};
