use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Rgb};
use nucleidet::core::server::{
    AnnotationSink, ImageRepository, JobControl, JobUpdate, RoiQuery, RoiRepository,
};
use nucleidet::detection::{PredictOptions, SegmentationEngine, TileOutput};
use nucleidet::{AnnotationGeometry, ImageId, ImageInstance, ProjectId, RoiDescriptor, RoiId};

pub const PROJECT: ProjectId = ProjectId(1);

/// ROI boundary whose bounding box is (100, 50) .. (300, 250)
pub const SQUARE_ROI: &str = "POLYGON ((100 50, 300 50, 300 250, 100 250, 100 50))";

pub fn make_roi(id: i64, image: i64, location: &str) -> RoiDescriptor {
    RoiDescriptor {
        id: RoiId(id),
        image: ImageId(image),
        project: PROJECT,
        location: location.to_string(),
    }
}

/// Writes a small white PNG crop.
pub fn write_test_crop(path: &Path) {
    let img = ImageBuffer::from_fn(20, 20, |_, _| Rgb([255u8, 255u8, 255u8]));
    img.save_with_format(path, image::ImageFormat::Png)
        .expect("Failed to save test crop");
}

/// In-memory annotation server recording every call made to it.
#[derive(Default)]
pub struct FakeServer {
    pub images: Vec<ImageInstance>,
    pub rois: BTreeMap<ImageId, Vec<RoiDescriptor>>,
    /// Extra tile suffixes written next to the crop, e.g. `_b` gives `<roi>_b.png`
    pub extra_tiles: BTreeMap<RoiId, Vec<String>>,
    pub fail_images: bool,
    pub fail_uploads: bool,

    pub roi_queries: RefCell<Vec<RoiQuery>>,
    pub dumped: RefCell<Vec<PathBuf>>,
    pub batches: RefCell<Vec<Vec<AnnotationGeometry>>>,
    pub updates: RefCell<Vec<JobUpdate>>,
}

impl FakeServer {
    pub fn with_images(ids: &[i64]) -> Self {
        Self {
            images: ids
                .iter()
                .map(|&id| ImageInstance {
                    id: ImageId(id),
                    project: PROJECT,
                    filename: Some(format!("slide-{}.svs", id)),
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn add_roi(&mut self, roi: RoiDescriptor) {
        self.rois.entry(roi.image).or_default().push(roi);
    }

    pub fn queried_images(&self) -> Vec<ImageId> {
        self.roi_queries.borrow().iter().map(|q| q.image).collect()
    }

    pub fn comments(&self) -> Vec<String> {
        self.updates.borrow().iter().map(|u| u.comment.clone()).collect()
    }
}

impl ImageRepository for FakeServer {
    fn get_images(&self, project: ProjectId) -> anyhow::Result<Vec<ImageInstance>> {
        if self.fail_images {
            anyhow::bail!("image listing unavailable");
        }
        Ok(self
            .images
            .iter()
            .filter(|i| i.project == project)
            .cloned()
            .collect())
    }
}

impl RoiRepository for FakeServer {
    fn get_rois(&self, query: &RoiQuery) -> anyhow::Result<Vec<RoiDescriptor>> {
        self.roi_queries.borrow_mut().push(*query);
        Ok(self.rois.get(&query.image).cloned().unwrap_or_default())
    }

    fn dump_roi(&self, roi: &RoiDescriptor, dest: &Path) -> anyhow::Result<()> {
        self.dumped.borrow_mut().push(dest.to_path_buf());
        write_test_crop(dest);
        if let (Some(suffixes), Some(dir)) = (self.extra_tiles.get(&roi.id), dest.parent()) {
            for suffix in suffixes {
                write_test_crop(&dir.join(format!("{}{}.png", roi.id, suffix)));
            }
        }
        Ok(())
    }
}

impl AnnotationSink for FakeServer {
    fn save_annotations(&self, annotations: &[AnnotationGeometry]) -> anyhow::Result<()> {
        if self.fail_uploads {
            anyhow::bail!("upload rejected");
        }
        self.batches.borrow_mut().push(annotations.to_vec());
        Ok(())
    }
}

impl JobControl for FakeServer {
    fn update_job(&self, update: &JobUpdate) -> anyhow::Result<()> {
        self.updates.borrow_mut().push(update.clone());
        Ok(())
    }
}

/// One nucleus as the engine reports it: key, `(row, col)` contour, type
pub type FakeNucleus = (&'static str, Vec<[f64; 2]>, Option<serde_json::Value>);

/// Segmentation engine writing canned artifacts, keyed by tile file name.
#[derive(Default)]
pub struct FakeEngine {
    pub nuclei: BTreeMap<String, Vec<FakeNucleus>>,
    pub failing: BTreeSet<String>,
    pub calls: RefCell<Vec<(PathBuf, PathBuf)>>,
}

impl FakeEngine {
    pub fn with_nuclei(mut self, tile: &str, nuclei: Vec<FakeNucleus>) -> Self {
        self.nuclei.insert(tile.to_string(), nuclei);
        self
    }

    pub fn failing_on(mut self, tile: &str) -> Self {
        self.failing.insert(tile.to_string());
        self
    }

    pub fn called_tiles(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|(tile, _)| file_name(tile))
            .collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl SegmentationEngine for FakeEngine {
    fn predict(
        &self,
        tiles: &[PathBuf],
        save_dir: &Path,
        _options: &PredictOptions,
    ) -> anyhow::Result<Vec<TileOutput>> {
        fs::create_dir_all(save_dir)?;
        let mut outputs = Vec::new();
        for (index, tile) in tiles.iter().enumerate() {
            self.calls
                .borrow_mut()
                .push((tile.clone(), save_dir.to_path_buf()));
            let name = file_name(tile);
            if self.failing.contains(&name) {
                anyhow::bail!("engine crashed on {}", name);
            }

            let mut artifact = serde_json::Map::new();
            for (key, contour, label) in self.nuclei.get(&name).cloned().unwrap_or_default() {
                artifact.insert(
                    key.to_string(),
                    serde_json::json!({
                        "contour": contour,
                        "type": label,
                        "type_prob": 0.9,
                    }),
                );
            }
            let stem = save_dir.join(index.to_string());
            fs::write(
                stem.with_extension("json"),
                serde_json::to_vec(&serde_json::Value::Object(artifact))?,
            )?;
            outputs.push(TileOutput {
                input: tile.clone(),
                output_stem: stem,
            });
        }
        Ok(outputs)
    }
}

/// Square contour in tile space, `size` pixels wide, top-left at `(row, col)`
pub fn square_contour(row: f64, col: f64, size: f64) -> Vec<[f64; 2]> {
    vec![
        [row, col],
        [row, col + size],
        [row + size, col + size],
        [row + size, col],
    ]
}
