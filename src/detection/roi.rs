use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

use crate::core::server::RoiRepository;
use crate::detection::mask::{TileMasking, apply_mask};
use crate::error::JobError;
use crate::geometry::{Geometry, parse_wkt};
use crate::models::{BoundingBox, RoiDescriptor, RoiId};

/// Tiles materialized for one ROI
#[derive(Debug, Clone)]
pub struct RoiTiles {
    pub bounds: BoundingBox,
    /// Directory holding the tiles and the inference results of this ROI
    pub dir: PathBuf,
    /// Tile files, sorted by file name
    pub tiles: Vec<PathBuf>,
}

/// Materializes ROI rasters under `<working dir>/<project>/<image>/<roi>/`
pub struct RoiFetcher<'a> {
    source: &'a dyn RoiRepository,
    working_dir: &'a Path,
    masking: TileMasking,
}

impl<'a> RoiFetcher<'a> {
    pub fn new(source: &'a dyn RoiRepository, working_dir: &'a Path, masking: TileMasking) -> Self {
        Self {
            source,
            working_dir,
            masking,
        }
    }

    pub fn roi_dir(&self, roi: &RoiDescriptor) -> PathBuf {
        self.working_dir
            .join(roi.project.to_string())
            .join(roi.image.to_string())
            .join(roi.id.to_string())
    }

    /// Parse the boundary, dump the crop and list the resulting tiles
    pub fn fetch(&self, roi: &RoiDescriptor) -> Result<RoiTiles, JobError> {
        let boundary = parse_wkt(&roi.location).map_err(|source| JobError::MalformedBoundary {
            roi: roi.id,
            source,
        })?;
        let bounds = boundary
            .bounds()
            .ok_or(JobError::EmptyBoundary { roi: roi.id })?;
        tracing::debug!(
            roi = %roi.id,
            ?bounds,
            width = bounds.width(),
            height = bounds.height(),
            "ROI bounds"
        );

        let dir = self.roi_dir(roi);
        let tile_path = dir.join(format!("{}.png", roi.id));
        self.materialize(roi, &boundary, &bounds, &dir, &tile_path)
            .map_err(|source| JobError::Materialization {
                roi: roi.id,
                source,
            })?;

        let tiles = list_tiles(&dir, roi.id).map_err(|source| JobError::Materialization {
            roi: roi.id,
            source,
        })?;

        Ok(RoiTiles {
            bounds,
            dir,
            tiles,
        })
    }

    fn materialize(
        &self,
        roi: &RoiDescriptor,
        boundary: &Geometry,
        bounds: &BoundingBox,
        dir: &Path,
        tile_path: &Path,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create ROI directory {:?}", dir))?;
        tracing::debug!(roi = %roi.id, path = ?tile_path, "Dumping ROI");
        self.source.dump_roi(roi, tile_path)?;

        if self.masking != TileMasking::None {
            let crop = image::open(tile_path)
                .with_context(|| format!("Failed to open ROI crop {:?}", tile_path))?;
            apply_mask(&crop, boundary, bounds, self.masking)
                .save(tile_path)
                .with_context(|| format!("Failed to save masked ROI crop {:?}", tile_path))?;
        }
        Ok(())
    }
}

/// Every `<roi id>*.png` file in `dir`, sorted by name
pub fn list_tiles(dir: &Path, roi: RoiId) -> anyhow::Result<Vec<PathBuf>> {
    let prefix = roi.to_string();
    let mut tiles = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(&prefix) && name.ends_with(".png") {
            tiles.push(entry.path());
        }
    }
    tiles.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_matching_tiles_in_name_order() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["42_b.png", "42.png", "42_a.png", "42.txt", "7.png"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("42_dir.png")).unwrap();

        let tiles = list_tiles(dir.path(), RoiId(42)).unwrap();
        let names: Vec<_> = tiles
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["42.png", "42_a.png", "42_b.png"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(list_tiles(&dir.path().join("nope"), RoiId(1)).is_err());
    }
}
