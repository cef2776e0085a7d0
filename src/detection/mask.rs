use std::str::FromStr;

use image::{DynamicImage, GrayImage, Luma, Rgba};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use crate::geometry::Geometry;
use crate::models::{AbsPoint, BoundingBox};

/// How pixels of a ROI crop that fall outside the ROI boundary are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileMasking {
    /// Keep the rectangular crop as is
    None,
    /// Paint outside pixels black
    Mask,
    /// Make outside pixels fully transparent (RGBA output)
    #[default]
    AlphaMask,
}

impl FromStr for TileMasking {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TileMasking::None),
            "mask" => Ok(TileMasking::Mask),
            "alpha-mask" | "alphamask" | "alpha" => Ok(TileMasking::AlphaMask),
            other => Err(anyhow::anyhow!(
                "Unknown masking mode '{}' (expected none, mask or alpha-mask)",
                other
            )),
        }
    }
}

/// Rasterize the ROI boundary into a mask the size of the crop.
/// Boundary points are cartesian, the crop is a raster whose top-left pixel
/// sits at `(minx, maxy)`.
pub fn boundary_mask(boundary: &Geometry, bounds: &BoundingBox, width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for polygon in boundary.polygons() {
        if let Some(ring) = raster_ring(&polygon.exterior, bounds) {
            draw_polygon_mut(&mut mask, &ring, Luma([255u8]));
        }
        for hole in &polygon.interiors {
            if let Some(ring) = raster_ring(hole, bounds) {
                draw_polygon_mut(&mut mask, &ring, Luma([0u8]));
            }
        }
    }
    mask
}

fn raster_ring(ring: &[AbsPoint], bounds: &BoundingBox) -> Option<Vec<Point<i32>>> {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(ring.len());
    for p in ring {
        let pixel = Point::new(
            (p.x - bounds.min_x).round() as i32,
            (bounds.max_y - p.y).round() as i32,
        );
        if points.last() != Some(&pixel) {
            points.push(pixel);
        }
    }
    // imageproc wants an open ring
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    (points.len() >= 3).then_some(points)
}

/// Apply `masking` to a ROI crop
pub fn apply_mask(
    tile: &DynamicImage,
    boundary: &Geometry,
    bounds: &BoundingBox,
    masking: TileMasking,
) -> DynamicImage {
    match masking {
        TileMasking::None => tile.clone(),
        TileMasking::Mask => {
            let mask = boundary_mask(boundary, bounds, tile.width(), tile.height());
            let mut rgb = tile.to_rgb8();
            for (x, y, pixel) in rgb.enumerate_pixels_mut() {
                if mask.get_pixel(x, y)[0] == 0 {
                    *pixel = image::Rgb([0, 0, 0]);
                }
            }
            DynamicImage::ImageRgb8(rgb)
        }
        TileMasking::AlphaMask => {
            let mask = boundary_mask(boundary, bounds, tile.width(), tile.height());
            let mut rgba = tile.to_rgba8();
            for (x, y, pixel) in rgba.enumerate_pixels_mut() {
                if mask.get_pixel(x, y)[0] == 0 {
                    let Rgba([r, g, b, _]) = *pixel;
                    *pixel = Rgba([r, g, b, 0]);
                }
            }
            DynamicImage::ImageRgba8(rgba)
        }
    }
}
