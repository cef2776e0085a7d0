pub mod wkt;

use crate::models::{AbsPoint, BoundingBox};

pub use wkt::{WktError, parse_wkt};

/// Polygon with one exterior ring and optional holes.
/// Rings are stored as given; closing the ring is left to serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<AbsPoint>,
    pub interiors: Vec<Vec<AbsPoint>>,
}

impl Polygon {
    /// Polygon without holes from an exterior point sequence
    pub fn from_points(points: Vec<AbsPoint>) -> Self {
        Self {
            exterior: points,
            interiors: Vec::new(),
        }
    }

    /// Well-known text of this polygon. Every ring is closed on output,
    /// so `[a, b, c]` becomes `POLYGON ((a, b, c, a))`.
    pub fn to_wkt(&self) -> String {
        let mut out = String::from("POLYGON (");
        write_ring(&mut out, &self.exterior);
        for ring in &self.interiors {
            out.push_str(", ");
            write_ring(&mut out, ring);
        }
        out.push(')');
        out
    }
}

fn write_ring(out: &mut String, ring: &[AbsPoint]) {
    out.push('(');
    for (i, p) in ring.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("{} {}", p.x, p.y));
    }
    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if ring.len() > 1 && first != last {
            out.push_str(&format!(", {} {}", first.x, first.y));
        }
    }
    out.push(')');
}

/// Parsed geometry in absolute image coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Empty,
    Point(AbsPoint),
    LineString(Vec<AbsPoint>),
    Polygon(Polygon),
    MultiPoint(Vec<AbsPoint>),
    MultiLineString(Vec<Vec<AbsPoint>>),
    MultiPolygon(Vec<Polygon>),
    Collection(Vec<Geometry>),
}

impl Geometry {
    /// Visit every vertex of the geometry, holes included
    pub fn for_each_point(&self, f: &mut dyn FnMut(&AbsPoint)) {
        match self {
            Geometry::Empty => {}
            Geometry::Point(p) => f(p),
            Geometry::LineString(points) | Geometry::MultiPoint(points) => {
                for p in points {
                    f(p);
                }
            }
            Geometry::Polygon(poly) => visit_polygon(poly, f),
            Geometry::MultiLineString(lines) => {
                for p in lines.iter().flatten() {
                    f(p);
                }
            }
            Geometry::MultiPolygon(polys) => {
                for poly in polys {
                    visit_polygon(poly, &mut *f);
                }
            }
            Geometry::Collection(parts) => {
                for part in parts {
                    part.for_each_point(&mut *f);
                }
            }
        }
    }

    /// Axis-aligned bounds `(minx, miny, maxx, maxy)`, `None` for an empty geometry
    pub fn bounds(&self) -> Option<BoundingBox> {
        let mut bounds: Option<BoundingBox> = None;
        self.for_each_point(&mut |p| {
            if let Some(b) = bounds.as_mut() {
                b.expand(p.x, p.y);
            } else {
                bounds = Some(BoundingBox::from_point(p.x, p.y));
            }
        });
        bounds
    }

    /// All areal parts of the geometry
    pub fn polygons(&self) -> Vec<&Polygon> {
        match self {
            Geometry::Polygon(poly) => vec![poly],
            Geometry::MultiPolygon(polys) => polys.iter().collect(),
            Geometry::Collection(parts) => parts.iter().flat_map(|g| g.polygons()).collect(),
            _ => Vec::new(),
        }
    }
}

fn visit_polygon(poly: &Polygon, f: &mut dyn FnMut(&AbsPoint)) {
    for p in poly.exterior.iter().chain(poly.interiors.iter().flatten()) {
        f(p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(f64, f64)]) -> Vec<AbsPoint> {
        coords.iter().map(|&(x, y)| AbsPoint::new(x, y)).collect()
    }

    #[test]
    fn polygon_wkt_closes_ring() {
        let poly = Polygon::from_points(pts(&[(100.0, 250.0), (110.0, 250.0), (110.0, 260.0)]));
        assert_eq!(poly.to_wkt(), "POLYGON ((100 250, 110 250, 110 260, 100 250))");
    }

    #[test]
    fn polygon_wkt_keeps_already_closed_ring() {
        let poly = Polygon::from_points(pts(&[(0.0, 0.0), (1.5, 0.0), (1.5, 2.0), (0.0, 0.0)]));
        assert_eq!(poly.to_wkt(), "POLYGON ((0 0, 1.5 0, 1.5 2, 0 0))");
    }

    #[test]
    fn bounds_cover_every_part() {
        let geom = Geometry::MultiPolygon(vec![
            Polygon::from_points(pts(&[(10.0, 10.0), (20.0, 10.0), (20.0, 30.0)])),
            Polygon::from_points(pts(&[(-5.0, 40.0), (0.0, 40.0), (0.0, 45.0)])),
        ]);
        assert_eq!(geom.bounds(), Some(BoundingBox::new(-5.0, 10.0, 20.0, 45.0)));
        assert_eq!(geom.polygons().len(), 2);
    }

    #[test]
    fn empty_geometry_has_no_bounds() {
        assert_eq!(Geometry::Empty.bounds(), None);
        assert_eq!(Geometry::Collection(vec![]).bounds(), None);
    }
}
