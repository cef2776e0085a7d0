use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, info_span, warn};

use crate::annotation::{AnnotationBatch, AnnotationBuilder, MIN_POLYGON_POINTS, upload_batch};
use crate::core::server::{
    AnnotationSink, ImageRepository, JobControl, JobStatus, JobUpdate, RoiQuery, RoiRepository,
    monitor,
};
use crate::detection::inference::{PredictOptions, SegmentationEngine, TileInference};
use crate::detection::mask::TileMasking;
use crate::detection::roi::RoiFetcher;
use crate::error::JobError;
use crate::models::{ImageId, ProjectId, RoiDescriptor, TermId, TypeLabel};
use crate::remap::{Anchor, remap_contour};

/// Sub-directory of a ROI directory holding the engine's result artifacts
pub const RESULTS_DIR_NAME: &str = "hovernet_results";

/// Which images of the project to run on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSelection {
    /// Every image of the project, in the order the server lists them
    All,
    /// Exactly these images, in this order
    Ids(Vec<ImageId>),
}

impl FromStr for ImageSelection {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(ImageSelection::All);
        }
        s.split(',')
            .map(|part| part.trim().parse::<i64>().map(ImageId))
            .collect::<Result<Vec<_>, _>>()
            .map(ImageSelection::Ids)
            .map_err(|_| JobError::InvalidSelection(s.to_string()))
    }
}

/// What to do when a single tile or ROI cannot be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the job on the first failure
    #[default]
    FailFast,
    /// Log and skip the failing tile, or the ROI for boundary and raster
    /// failures. Upload and listing failures still abort.
    Continue,
}

/// What the job runs on
#[derive(Debug, Clone)]
pub struct JobParameters {
    pub project: ProjectId,
    /// Term marking the ROI annotations; `None` takes every annotation of the image
    pub roi_term: Option<TermId>,
    /// Term attached to every nucleus annotation
    pub cell_term: TermId,
    pub images: ImageSelection,
    pub type_terms: BTreeMap<TypeLabel, TermId>,
}

/// How the job runs
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub working_dir: PathBuf,
    pub masking: TileMasking,
    pub failure_policy: FailurePolicy,
    /// Fraction of the images between two progress reports
    pub progress_period: f64,
    pub predict: PredictOptions,
}

impl PipelineContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            masking: TileMasking::default(),
            failure_policy: FailurePolicy::default(),
            progress_period: 0.1,
            predict: PredictOptions::default(),
        }
    }
}

/// Collaborators the pipeline talks to
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub images: &'a dyn ImageRepository,
    pub rois: &'a dyn RoiRepository,
    pub annotations: &'a dyn AnnotationSink,
    pub job: &'a dyn JobControl,
    pub engine: &'a dyn SegmentationEngine,
}

/// Counters of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub images: usize,
    pub rois: usize,
    pub tiles: usize,
    pub detections: usize,
    pub annotations: usize,
    /// Detections with too few contour points to form a polygon
    pub degenerate: usize,
    pub skipped_tiles: usize,
    pub skipped_rois: usize,
}

/// Image -> ROI -> tile -> nucleus driver
pub struct Pipeline<'a> {
    services: Services<'a>,
    params: JobParameters,
    context: PipelineContext,
}

impl<'a> Pipeline<'a> {
    pub fn new(services: Services<'a>, params: JobParameters, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            services,
            params,
            context: PipelineContext::new(working_dir),
        }
    }

    pub fn with_masking(mut self, masking: TileMasking) -> Self {
        self.context.masking = masking;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.context.failure_policy = policy;
        self
    }

    pub fn with_progress_period(mut self, period: f64) -> Self {
        self.context.progress_period = period;
        self
    }

    pub fn with_predict_options(mut self, options: PredictOptions) -> Self {
        self.context.predict = options;
        self
    }

    /// Run the whole job. The job is reported running at 0% on entry and
    /// terminated at 100% only after every selected image went through.
    pub fn run(&self) -> Result<JobSummary, JobError> {
        self.report(JobUpdate::new(JobStatus::Running, 0, "Initialization..."));
        if self.params.roi_term.is_none() {
            warn!("No ROI term given, every annotation of an image is taken as a ROI");
        }

        let images = self.select_images()?;
        info!(count = images.len(), project = %self.params.project, "Selected images");

        let mut summary = JobSummary::default();
        for image in monitor(
            self.services.job,
            images,
            "Running detection on image",
            self.context.progress_period,
        ) {
            let _span = info_span!("image", id = %image).entered();
            self.process_image(image, &mut summary)?;
            summary.images += 1;
        }

        self.report(JobUpdate::new(JobStatus::TERMINATED, 100, "Finished."));
        info!(?summary, "Job finished");
        Ok(summary)
    }

    /// Image ids to process, in processing order
    pub fn select_images(&self) -> Result<Vec<ImageId>, JobError> {
        match &self.params.images {
            ImageSelection::Ids(ids) => Ok(ids.clone()),
            ImageSelection::All => {
                let images = self
                    .services
                    .images
                    .get_images(self.params.project)
                    .map_err(|source| JobError::ImageSource {
                        project: self.params.project,
                        source,
                    })?;
                Ok(images
                    .into_iter()
                    .map(|image| {
                        debug!(id = %image.id, filename = ?image.filename, "Listed image");
                        image.id
                    })
                    .collect())
            }
        }
    }

    fn process_image(&self, image: ImageId, summary: &mut JobSummary) -> Result<(), JobError> {
        let query = RoiQuery {
            project: self.params.project,
            term: self.params.roi_term,
            image,
        };
        let rois = self
            .services
            .rois
            .get_rois(&query)
            .map_err(|source| JobError::RoiSource { image, source })?;
        info!(count = rois.len(), "Fetched ROIs");

        for roi in &rois {
            let _span = info_span!("roi", id = %roi.id).entered();
            self.process_roi(roi, summary)?;
        }
        Ok(())
    }

    fn process_roi(&self, roi: &RoiDescriptor, summary: &mut JobSummary) -> Result<(), JobError> {
        let fetcher = RoiFetcher::new(
            self.services.rois,
            &self.context.working_dir,
            self.context.masking,
        );
        let tiles = match fetcher.fetch(roi) {
            Ok(tiles) => tiles,
            Err(e) if e.is_roi_local() && self.context.failure_policy == FailurePolicy::Continue => {
                warn!(error = %e, "Skipping ROI");
                summary.skipped_rois += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // one anchor for every tile of this ROI
        let anchor = Anchor::from_bounds(&tiles.bounds);
        let builder = AnnotationBuilder::new(roi.image, roi.project, self.params.cell_term)
            .with_type_terms(self.params.type_terms.clone());
        let mut batch = AnnotationBatch::new(roi.id);
        let inference = TileInference::new(self.services.engine, &self.context.predict);

        for (index, tile) in tiles.tiles.iter().enumerate() {
            info!(index, path = ?tile, "Processing ROI tile");
            match self.process_tile(&inference, tile, &tiles.dir, anchor, &builder, &mut batch, summary) {
                Ok(()) => summary.tiles += 1,
                Err(e) if self.context.failure_policy == FailurePolicy::Continue => {
                    warn!(error = %e, "Skipping tile");
                    summary.skipped_tiles += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let uploaded = upload_batch(self.services.annotations, batch)?;
        info!(annotations = uploaded, "Uploaded ROI annotations");
        summary.annotations += uploaded;
        summary.rois += 1;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_tile(
        &self,
        inference: &TileInference<'_>,
        tile: &Path,
        roi_dir: &Path,
        anchor: Anchor,
        builder: &AnnotationBuilder,
        batch: &mut AnnotationBatch,
        summary: &mut JobSummary,
    ) -> Result<(), JobError> {
        let save_dir = tile_results_dir(roi_dir, tile);
        let detections = inference
            .infer_tile(tile, &save_dir)
            .map_err(|source| JobError::Inference {
                tile: tile.to_path_buf(),
                source,
            })?;
        info!(count = detections.len(), "Detected nuclei");

        for detection in &detections {
            summary.detections += 1;
            if detection.contour.len() < MIN_POLYGON_POINTS {
                debug!(key = %detection.key, points = detection.contour.len(), "Skipping degenerate contour");
                summary.degenerate += 1;
                continue;
            }
            let points = remap_contour(anchor, &detection.contour);
            builder.append(batch, points, detection.label.as_ref());
            debug!(key = %detection.key, "Added nucleus annotation");
        }
        Ok(())
    }

    fn report(&self, update: JobUpdate) {
        if let Err(e) = self.services.job.update_job(&update) {
            warn!(error = %e, comment = %update.comment, "Failed to update job status");
        }
    }
}

/// Result directory of one tile: `<roi dir>/hovernet_results/<tile stem>`
pub fn tile_results_dir(roi_dir: &Path, tile: &Path) -> PathBuf {
    let stem = tile
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "tile".into());
    roi_dir.join(RESULTS_DIR_NAME).join(stem)
}
