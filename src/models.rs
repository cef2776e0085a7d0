use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Project on the annotation server; scopes which images are visible.
    ProjectId
);
id_type!(
    /// Image instance inside a project.
    ImageId
);
id_type!(
    /// Analyst-drawn region of interest (an annotation on the server).
    RoiId
);
id_type!(
    /// Ontology term used to classify annotations.
    TermId
);
id_type!(
    /// Server-side job whose status and progress this run reports.
    JobId
);

/// Axis-aligned bounding box in the image's absolute coordinate system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow the box so it also covers `(x, y)`
    pub fn expand(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn from_point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }
}

/// Pixel position inside a tile, in raster order (row first)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePoint {
    pub row: f64,
    pub col: f64,
}

impl TilePoint {
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }
}

/// Point in the whole-slide image's absolute (cartesian) coordinate system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsPoint {
    pub x: f64,
    pub y: f64,
}

impl AbsPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Image instance as listed by the image source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInstance {
    pub id: ImageId,
    pub project: ProjectId,
    pub filename: Option<String>,
}

/// ROI as returned by the annotation server, boundary still in text form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiDescriptor {
    pub id: RoiId,
    pub image: ImageId,
    pub project: ProjectId,
    /// Boundary geometry as well-known text
    pub location: String,
}

/// Class label attached to a detection by the segmentation engine.
/// Engines report either a numeric class index or a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeLabel {
    Index(i64),
    Name(String),
}

impl fmt::Display for TypeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeLabel::Index(i) => write!(f, "{}", i),
            TypeLabel::Name(name) => f.write_str(name),
        }
    }
}

/// One nucleus found inside a tile
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub key: String,
    /// Contour in tile-local pixel space, `(row, col)` per point
    pub contour: Vec<TilePoint>,
    pub label: Option<TypeLabel>,
}

/// Polygon annotation ready for upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationGeometry {
    /// Polygon as well-known text, absolute image coordinates
    pub location: String,
    pub image: ImageId,
    pub project: ProjectId,
    #[serde(rename = "term")]
    pub terms: Vec<TermId>,
}
