use std::path::PathBuf;

use thiserror::Error;

use crate::geometry::WktError;
use crate::models::{ImageId, ProjectId, RoiId};

/// Failures that stop a detection job, or a single ROI/tile when the
/// pipeline runs with [`FailurePolicy::Continue`](crate::pipeline::FailurePolicy).
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid image selection '{0}': expected 'all' or a comma-separated list of ids")]
    InvalidSelection(String),

    #[error("failed to list images of project {project}")]
    ImageSource {
        project: ProjectId,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to fetch ROIs of image {image}")]
    RoiSource {
        image: ImageId,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed boundary for ROI {roi}")]
    MalformedBoundary {
        roi: RoiId,
        #[source]
        source: WktError,
    },

    #[error("ROI {roi} has an empty boundary")]
    EmptyBoundary { roi: RoiId },

    #[error("failed to materialize ROI {roi}")]
    Materialization {
        roi: RoiId,
        #[source]
        source: anyhow::Error,
    },

    #[error("inference failed on tile {}", tile.display())]
    Inference {
        tile: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to upload {count} annotations for ROI {roi}")]
    Upload {
        roi: RoiId,
        count: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl JobError {
    /// Errors confined to a single ROI's boundary or raster
    pub fn is_roi_local(&self) -> bool {
        matches!(
            self,
            JobError::MalformedBoundary { .. }
                | JobError::EmptyBoundary { .. }
                | JobError::Materialization { .. }
        )
    }
}
