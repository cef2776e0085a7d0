//! Tile-local pixel coordinates to whole-slide absolute coordinates.
//!
//! A tile is a raster crop of a ROI's bounding box: row-major, origin at the
//! top-left pixel. The annotation server works in a cartesian system with its
//! origin at the bottom-left of the slide. The mapping is the affine
//! translation
//!
//! ```text
//! x = anchor.x + col
//! y = anchor.y + row
//! ```
//!
//! where the anchor is `(minx, maxy)` of the ROI bounding box. The vertical
//! anchor is the box's *maximum* y, not its minimum, and rows are added
//! without being negated.

use crate::models::{AbsPoint, BoundingBox, TilePoint};

/// Offset added to every tile-local point of one ROI
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

impl Anchor {
    /// Anchor of a ROI: `(minx, maxy)` of its bounding box
    pub fn from_bounds(bounds: &BoundingBox) -> Self {
        Self {
            x: bounds.min_x,
            y: bounds.max_y,
        }
    }
}

/// Map one tile pixel position to absolute coordinates
pub fn remap_point(anchor: Anchor, point: TilePoint) -> AbsPoint {
    AbsPoint {
        x: anchor.x + point.col,
        y: anchor.y + point.row,
    }
}

/// Map a whole contour. Output has the same length and order as the input,
/// each point depending only on its counterpart and the anchor.
pub fn remap_contour(anchor: Anchor, contour: &[TilePoint]) -> Vec<AbsPoint> {
    contour.iter().map(|&p| remap_point(anchor, p)).collect()
}
