use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::Context;
use serde::Deserialize;

use crate::models::{Detection, TilePoint, TypeLabel};

pub const DEFAULT_MODEL: &str = "hovernet_fast-pannuke";

/// Job-level settings handed to the segmentation engine on every call
#[derive(Debug, Clone, PartialEq)]
pub struct PredictOptions {
    pub model: String,
    /// Engine run mode; tiles are always predicted in `tile` mode
    pub mode: String,
    pub batch_size: usize,
    pub loader_workers: usize,
    pub postproc_workers: usize,
    pub on_gpu: bool,
    /// Ask the engine to raise instead of skipping inputs it cannot process
    pub crash_on_exception: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            mode: "tile".to_string(),
            batch_size: 2,
            loader_workers: 0,
            postproc_workers: 0,
            on_gpu: false,
            crash_on_exception: true,
        }
    }
}

/// One input tile and the stem of its result artifact (`<stem>.json`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TileOutput {
    pub input: PathBuf,
    pub output_stem: PathBuf,
}

/// External nucleus segmentation engine
pub trait SegmentationEngine {
    /// Segment `tiles`, writing one result artifact per tile under `save_dir`
    fn predict(
        &self,
        tiles: &[PathBuf],
        save_dir: &Path,
        options: &PredictOptions,
    ) -> anyhow::Result<Vec<TileOutput>>;
}

#[derive(Deserialize)]
struct NucleusRecord {
    contour: Vec<[f64; 2]>,
    #[serde(rename = "type", default)]
    label: Option<TypeLabel>,
}

pub fn artifact_path(output_stem: &Path) -> PathBuf {
    let mut name: OsString = output_stem.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Load a result artifact: a JSON object mapping detection key to
/// `{"contour": [[row, col], ...], "type": ...}`. Extra fields are ignored.
/// Detections come back ordered by key, which carries no meaning.
pub fn load_detections(artifact: &Path) -> anyhow::Result<Vec<Detection>> {
    let raw = fs::read(artifact)
        .with_context(|| format!("Failed to read inference result {:?}", artifact))?;
    let records: BTreeMap<String, NucleusRecord> = serde_json::from_slice(&raw)
        .with_context(|| format!("Malformed inference result {:?}", artifact))?;

    Ok(records
        .into_iter()
        .map(|(key, record)| Detection {
            key,
            contour: record
                .contour
                .into_iter()
                .map(|[row, col]| TilePoint::new(row, col))
                .collect(),
            label: record.label,
        })
        .collect())
}

/// Runs the engine on one tile at a time
pub struct TileInference<'a> {
    engine: &'a dyn SegmentationEngine,
    options: &'a PredictOptions,
}

impl<'a> TileInference<'a> {
    pub fn new(engine: &'a dyn SegmentationEngine, options: &'a PredictOptions) -> Self {
        Self { engine, options }
    }

    pub fn infer_tile(&self, tile: &Path, save_dir: &Path) -> anyhow::Result<Vec<Detection>> {
        let outputs = self
            .engine
            .predict(&[tile.to_path_buf()], save_dir, self.options)?;
        let output = outputs
            .iter()
            .find(|o| o.input == tile)
            .or_else(|| outputs.first())
            .ok_or_else(|| anyhow::anyhow!("Engine produced no output for {:?}", tile))?;
        load_detections(&artifact_path(&output.output_stem))
    }
}

/// Segmentation engine run as a child process.
///
/// The program is called as
/// `<program> [extra args] --model M --mode tile --batch-size N
/// --num-loader-workers N --num-postproc-workers N [--on-gpu]
/// [--crash-on-exception] --save-dir DIR TILE...`
/// and must print a JSON array of `{"input": .., "output_stem": ..}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn command(&self, tiles: &[PathBuf], save_dir: &Path, options: &PredictOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .arg("--model")
            .arg(&options.model)
            .arg("--mode")
            .arg(&options.mode)
            .arg("--batch-size")
            .arg(options.batch_size.to_string())
            .arg("--num-loader-workers")
            .arg(options.loader_workers.to_string())
            .arg("--num-postproc-workers")
            .arg(options.postproc_workers.to_string());
        if options.on_gpu {
            cmd.arg("--on-gpu");
        }
        if options.crash_on_exception {
            cmd.arg("--crash-on-exception");
        }
        cmd.arg("--save-dir").arg(save_dir).args(tiles);
        cmd
    }
}

impl SegmentationEngine for CommandEngine {
    fn predict(
        &self,
        tiles: &[PathBuf],
        save_dir: &Path,
        options: &PredictOptions,
    ) -> anyhow::Result<Vec<TileOutput>> {
        let output = self
            .command(tiles, save_dir, options)
            .output()
            .with_context(|| format!("Failed to start segmentation engine {:?}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Segmentation engine exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout)
            .context("Segmentation engine printed malformed output list")
    }
}
