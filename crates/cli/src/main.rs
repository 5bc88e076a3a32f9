use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use facetrace_core::detection::domain::reference_gallery::SubjectReferences;
use facetrace_core::detection::infrastructure::onnx_face_backend::OnnxFaceBackend;
use facetrace_core::pipeline::clip_recorder::ClipOutput;
use facetrace_core::pipeline::detection_job::{CropOutput, DetectionJob};
use facetrace_core::pipeline::job_observer::LogJobObserver;
use facetrace_core::pipeline::job_state::JobStatus;
use facetrace_core::pipeline::unattended_observer::{ResourceLimitPolicy, UnattendedObserver};
use facetrace_core::report::domain::report_format::ReportFormat;
use facetrace_core::shared::constants::IMAGE_EXTENSIONS;
use facetrace_core::shared::detection_config::{DecodeErrorPolicy, DetectionConfig};
use facetrace_core::shared::model_resolver::{ModelResolver, ProgressFn};
use facetrace_core::video::domain::video_writer::VideoWriter;
use facetrace_core::video::infrastructure::ffmpeg_reader::FfmpegReader;
use facetrace_core::video::infrastructure::ffmpeg_writer::FfmpegWriter;
use facetrace_core::video::infrastructure::image_file_reader::ImageFileReader;
use facetrace_core::video::infrastructure::image_file_writer::ImageFileWriter;

/// Find reference subjects in a recorded video.
#[derive(Parser)]
#[command(name = "facetrace")]
struct Cli {
    /// Input video file.
    input: PathBuf,

    /// Subject to search for, as NAME=IMAGE[,IMAGE...]. Repeatable.
    #[arg(long = "subject", value_name = "NAME=IMAGES", required = true)]
    subjects: Vec<String>,

    /// JSON configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Analyze every Nth frame (1 = every frame).
    #[arg(long)]
    frame_skip: Option<usize>,

    /// Maximum embedding distance accepted as a match.
    #[arg(long)]
    match_threshold: Option<f64>,

    /// Lower-face texture level below which a mask is assumed.
    #[arg(long)]
    mask_threshold: Option<f64>,

    /// Frames a subject may be missing before its appearance ends.
    #[arg(long)]
    gap_tolerance: Option<usize>,

    /// Largest faces considered per frame.
    #[arg(long)]
    max_faces: Option<usize>,

    /// On a frame that fails to decode: skip or abort.
    #[arg(long)]
    on_decode_error: Option<String>,

    /// On a frame above the pixel limit: stop, or resume past it.
    #[arg(long, default_value = "stop")]
    on_resource_limit: ResourceLimitPolicy,

    /// Seconds of video recorded from the start of each detection.
    #[arg(long)]
    clip_duration: Option<f64>,

    /// Directory for the report, face crops and clips.
    #[arg(long, default_value = "facetrace-output")]
    output_dir: PathBuf,

    /// Report format: csv, json or text.
    #[arg(long, default_value = "csv")]
    report_format: ReportFormat,

    /// Do not save face crops.
    #[arg(long)]
    no_crops: bool,

    /// Do not record detection clips.
    #[arg(long)]
    no_clips: bool,

    /// Directory searched for model files before downloading them.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Log progress every N analyzed frames.
    #[arg(long, default_value = "50")]
    progress_every: usize,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let config = build_config(&cli)?;
    let subjects = cli
        .subjects
        .iter()
        .map(|s| parse_subject(s))
        .collect::<Result<Vec<_>, _>>()?;

    let resolver = ModelResolver::new(cli.models_dir.clone())?;
    let backend = OnnxFaceBackend::from_resolver(&resolver, download_progress)?;

    let report_path = cli
        .output_dir
        .join(format!("detections.{}", cli.report_format.extension()));

    let mut job = DetectionJob::new(
        config,
        &cli.input,
        subjects,
        Box::new(FfmpegReader::new()),
        Box::new(ImageFileReader::new()),
        Box::new(backend),
    )?;
    let observer = UnattendedObserver::new(
        Box::new(LogJobObserver::new(cli.progress_every)),
        job.handle(),
        cli.on_resource_limit,
    )
    .with_report(&report_path, cli.report_format);
    job = job.with_observer(Box::new(observer));
    if !cli.no_crops {
        job = job.with_crop_output(CropOutput::new(
            cli.output_dir.join("faces"),
            Box::new(ImageFileWriter::new()),
        ));
    }
    if !cli.no_clips {
        job = job.with_clip_output(ClipOutput::new(
            cli.output_dir.join("clips"),
            Box::new(|| -> Box<dyn VideoWriter> { Box::new(FfmpegWriter::new()) }),
        ));
    }

    let handle = job.start()?;
    let snapshot = handle.wait();

    // Also covers runs that closed no events, which never triggered a rewrite.
    handle.store().write_report(&report_path, cli.report_format)?;
    log::info!(
        "Wrote {} detection(s) to {}",
        handle.store().len(),
        report_path.display()
    );

    match (snapshot.status, snapshot.failure) {
        (JobStatus::Failed, Some(failure)) => Err(failure.message.into()),
        (JobStatus::Failed, None) => Err("detection job failed".into()),
        _ => Ok(()),
    }
}

fn build_config(cli: &Cli) -> Result<DetectionConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => DetectionConfig::from_json_file(path)?,
        None => DetectionConfig::default(),
    };
    if let Some(v) = cli.frame_skip {
        config.frame_skip = v;
    }
    if let Some(v) = cli.match_threshold {
        config.match_threshold = v;
    }
    if let Some(v) = cli.mask_threshold {
        config.mask_threshold = v;
    }
    if let Some(v) = cli.gap_tolerance {
        config.track_gap_tolerance = v;
    }
    if let Some(v) = cli.max_faces {
        config.max_faces_per_frame = v;
    }
    if let Some(policy) = &cli.on_decode_error {
        config.decode_error_policy = parse_decode_policy(policy)?;
    }
    if let Some(v) = cli.clip_duration {
        config.clip_duration_seconds = v;
    }
    config.validate()?;
    Ok(config)
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.input.is_file() {
        return Err(format!("Input file not found: {}", cli.input.display()).into());
    }
    if cli.progress_every == 0 {
        return Err("Progress interval must be at least 1".into());
    }
    Ok(())
}

fn parse_decode_policy(s: &str) -> Result<DecodeErrorPolicy, String> {
    match s {
        "skip" => Ok(DecodeErrorPolicy::Skip),
        "abort" => Ok(DecodeErrorPolicy::Abort),
        other => Err(format!(
            "Decode error policy must be 'skip' or 'abort', got '{other}'"
        )),
    }
}

/// Parses `NAME=IMAGE[,IMAGE...]`.
fn parse_subject(arg: &str) -> Result<SubjectReferences, String> {
    let (name, images) = arg
        .split_once('=')
        .ok_or_else(|| format!("Subject must be NAME=IMAGE[,IMAGE...], got '{arg}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Subject name is empty in '{arg}'"));
    }
    let paths: Vec<PathBuf> = images
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect();
    if let Some(path) = paths.iter().find(|p| !is_image(p)) {
        return Err(format!(
            "Reference for '{name}' is not a supported image: {}",
            path.display()
        ));
    }
    Ok(SubjectReferences::new(name, paths))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn download_progress(model: &'static str) -> Option<ProgressFn> {
    Some(Box::new(move |downloaded, total| {
        if total > 0 {
            let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
            eprint!("\rDownloading {model}... {pct}%");
        } else {
            eprint!("\rDownloading {model}... {downloaded} bytes");
        }
        if total > 0 && downloaded >= total {
            eprintln!();
        }
    }))
}
