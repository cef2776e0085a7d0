mod http;
mod job;

use std::path::Path;

use crate::models::{AnnotationGeometry, ImageId, ImageInstance, ProjectId, RoiDescriptor, TermId};

pub use http::CytomineClient;
pub use job::{JobStatus, JobUpdate, Monitor, monitor, run_job};

/// Filter for ROI lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiQuery {
    pub project: ProjectId,
    pub term: Option<TermId>,
    pub image: ImageId,
}

pub trait ImageRepository {
    /// Images of a project, in the order the server lists them
    fn get_images(&self, project: ProjectId) -> anyhow::Result<Vec<ImageInstance>>;
}

pub trait RoiRepository {
    fn get_rois(&self, query: &RoiQuery) -> anyhow::Result<Vec<RoiDescriptor>>;

    /// Write the raster crop of the ROI's bounding box to `dest` as PNG.
    /// The parent directory exists when this is called.
    fn dump_roi(&self, roi: &RoiDescriptor, dest: &Path) -> anyhow::Result<()>;
}

pub trait AnnotationSink {
    /// Persist all annotations in one bulk call; all-or-nothing
    fn save_annotations(&self, annotations: &[AnnotationGeometry]) -> anyhow::Result<()>;
}

pub trait JobControl {
    fn update_job(&self, update: &JobUpdate) -> anyhow::Result<()>;
}
