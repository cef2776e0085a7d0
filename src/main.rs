use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nucleidet::core::server::{CytomineClient, run_job};
use nucleidet::detection::{CommandEngine, PredictOptions, TileMasking};
use nucleidet::{
    FailurePolicy, ImageSelection, JobId, JobParameters, Pipeline, ProjectId, Services, TermId,
    TypeLabel,
};

#[derive(Parser)]
#[command(name = "nucleidet")]
#[command(about = "Detect nuclei inside ROIs of whole-slide images and upload them as annotations")]
struct Cli {
    /// Annotation server host, e.g. https://research.cytomine.be
    #[arg(long, env = "CYTOMINE_HOST")]
    host: String,

    /// Value sent as the Authorization header of every request
    #[arg(long, env = "CYTOMINE_AUTH", hide_env_values = true)]
    auth_header: Option<String>,

    /// Server-side job receiving status and progress updates
    #[arg(long, env = "CYTOMINE_ID_JOB")]
    job_id: Option<i64>,

    #[arg(long = "project", env = "CYTOMINE_ID_PROJECT")]
    project: i64,

    /// Term of the ROI annotations to run detection in
    #[arg(long, env = "CYTOMINE_ID_ROI_TERM")]
    roi_term: i64,

    /// Term attached to every detected nucleus
    #[arg(long, env = "CYTOMINE_ID_CELL_TERM")]
    cell_term: i64,

    /// "all" or a comma-separated list of image ids
    #[arg(long, env = "CYTOMINE_ID_IMAGES", default_value = "all")]
    images: String,

    /// Segmentation model name passed to the engine
    #[arg(long, env = "HOVERNET_MODEL", default_value = nucleidet::detection::inference::DEFAULT_MODEL)]
    model: String,

    /// Run the segmentation engine on GPU
    #[arg(long)]
    on_gpu: bool,

    /// Segmentation engine executable
    #[arg(long, env = "NUCLEIDET_ENGINE", value_name = "PROGRAM")]
    engine: PathBuf,

    /// Extra leading arguments for the engine executable
    #[arg(long = "engine-arg", value_name = "ARG")]
    engine_args: Vec<String>,

    #[arg(long, default_value_t = 2)]
    batch_size: usize,

    /// Abort the job on the first tile or ROI failure
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    crash_on_exception: bool,

    /// none, mask or alpha-mask
    #[arg(long, default_value = "alpha-mask")]
    masking: TileMasking,

    /// Extra term for detections of a type, as LABEL=TERM (repeatable)
    #[arg(long = "type-term", value_name = "LABEL=TERM", value_parser = parse_type_term)]
    type_terms: Vec<(TypeLabel, TermId)>,

    /// Where ROI tiles and results are written (default: $HOME/<job id>)
    #[arg(long, value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Fraction of the images between two progress updates
    #[arg(long, default_value_t = 0.1)]
    progress_period: f64,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_type_term(s: &str) -> Result<(TypeLabel, TermId), String> {
    let (label, term) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LABEL=TERM, got '{}'", s))?;
    let term = term
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid term id '{}': {}", term, e))?;
    let label = label.trim();
    let label = match label.parse::<i64>() {
        Ok(index) => TypeLabel::Index(index),
        Err(_) => TypeLabel::Name(label.to_string()),
    };
    Ok((label, TermId(term)))
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let images: ImageSelection = args.images.parse()?;
    let job = args.job_id.map(JobId);

    let working_dir = match args.working_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .context("Cannot determine home directory, pass --working-dir")?
            .join(job.map_or_else(|| "nucleidet".to_string(), |j| j.to_string())),
    };
    tracing::info!(path = ?working_dir, "Working directory");

    let client = CytomineClient::new(&args.host, args.timeout_secs, args.auth_header)?.with_job(job);
    let engine = CommandEngine::new(args.engine).with_args(args.engine_args);

    let params = JobParameters {
        project: ProjectId(args.project),
        roi_term: Some(TermId(args.roi_term)),
        cell_term: TermId(args.cell_term),
        images,
        type_terms: args.type_terms.into_iter().collect::<BTreeMap<_, _>>(),
    };
    let predict = PredictOptions {
        model: args.model,
        batch_size: args.batch_size,
        on_gpu: args.on_gpu,
        crash_on_exception: args.crash_on_exception,
        ..PredictOptions::default()
    };
    let policy = if args.crash_on_exception {
        FailurePolicy::FailFast
    } else {
        FailurePolicy::Continue
    };

    let services = Services {
        images: &client,
        rois: &client,
        annotations: &client,
        job: &client,
        engine: &engine,
    };
    let pipeline = Pipeline::new(services, params, working_dir)
        .with_masking(args.masking)
        .with_failure_policy(policy)
        .with_progress_period(args.progress_period)
        .with_predict_options(predict);

    let summary = run_job(&client, || pipeline.run())?;

    println!("\n=== Nucleus Detection Results ===");
    println!("Images processed: {}", summary.images);
    println!("ROIs processed:   {}", summary.rois);
    println!("Tiles processed:  {}", summary.tiles);
    println!("Nuclei detected:  {}", summary.detections);
    println!("Annotations sent: {}", summary.annotations);
    if summary.degenerate > 0 {
        println!("Degenerate contours skipped: {}", summary.degenerate);
    }
    if summary.skipped_tiles > 0 || summary.skipped_rois > 0 {
        println!(
            "Skipped: {} tiles, {} ROIs",
            summary.skipped_tiles, summary.skipped_rois
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_term_accepts_names_and_indices() {
        assert_eq!(
            parse_type_term("epithelial=123").unwrap(),
            (TypeLabel::Name("epithelial".to_string()), TermId(123))
        );
        assert_eq!(
            parse_type_term(" 2 = 9 ").unwrap(),
            (TypeLabel::Index(2), TermId(9))
        );
        assert!(parse_type_term("epithelial").is_err());
        assert!(parse_type_term("epithelial=x").is_err());
    }

    #[test]
    fn cli_parses_minimal_invocation() {
        let cli = Cli::try_parse_from([
            "nucleidet",
            "--host",
            "localhost",
            "--project",
            "1",
            "--roi-term",
            "2",
            "--cell-term",
            "3",
            "--engine",
            "segment",
            "--images",
            "5,7",
            "--crash-on-exception",
            "false",
        ])
        .unwrap();
        assert_eq!(cli.images, "5,7");
        assert!(!cli.crash_on_exception);
        assert_eq!(cli.masking, TileMasking::AlphaMask);
        assert_eq!(cli.batch_size, 2);
        assert_eq!(cli.roi_term, 2);
    }

    #[test]
    fn cli_requires_roi_term() {
        let result = Cli::try_parse_from([
            "nucleidet",
            "--host",
            "localhost",
            "--project",
            "1",
            "--cell-term",
            "3",
            "--engine",
            "segment",
        ]);
        assert!(result.is_err());
    }
}
