mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from nucleidet for tests
pub use nucleidet::core::server::{JobStatus, JobUpdate, run_job};
pub use nucleidet::detection::TileMasking;
pub use nucleidet::{
    FailurePolicy, ImageId, ImageSelection, JobError, JobParameters, JobSummary, Pipeline,
    RoiId, Services, TermId, TypeLabel,
};

pub const CELL_TERM: TermId = TermId(100);

pub fn params(images: ImageSelection) -> JobParameters {
    JobParameters {
        project: PROJECT,
        roi_term: Some(TermId(50)),
        cell_term: CELL_TERM,
        images,
        type_terms: Default::default(),
    }
}

pub fn services<'a>(server: &'a FakeServer, engine: &'a FakeEngine) -> Services<'a> {
    Services {
        images: server,
        rois: server,
        annotations: server,
        job: server,
        engine,
    }
}
