pub mod annotation;
pub mod core;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod models;
pub mod pipeline;
pub mod remap;

pub use annotation::{AnnotationBatch, AnnotationBuilder, upload_batch};
pub use error::JobError;
pub use models::{
    AbsPoint, AnnotationGeometry, BoundingBox, Detection, ImageId, ImageInstance, JobId,
    ProjectId, RoiDescriptor, RoiId, TermId, TilePoint, TypeLabel,
};
pub use pipeline::{
    FailurePolicy, ImageSelection, JobParameters, JobSummary, Pipeline, PipelineContext, Services,
};
pub use remap::{Anchor, remap_contour, remap_point};
