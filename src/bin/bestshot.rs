//! bestshot - run an image or video job and print the JSON result
//!
//! The detector is supplied as a JSON script (see `ScriptedDetector`), which
//! stands in for the external model service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bestshot::{
    health, Detector, EngineConfig, FileConfig, FileSource, FilesystemArtifactSink, FrameDecoder,
    FrameRetention, ImageDecoder, ImageJob, JobResult, ModelHandle, PipelineError,
    ScriptedDetector, VideoJob,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Detector script (JSON) replayed as model output.
    #[arg(long, env = "BESTSHOT_DETECTOR_SCRIPT")]
    script: PathBuf,
    /// Artifact directory (overrides artifacts.root).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Skip annotated artifacts.
    #[arg(long)]
    no_render: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect objects in a single image.
    Image { file: PathBuf },
    /// Extract the best shot of every tracked object in a video.
    Video {
        /// Video file, image directory, or stub:// clip.
        source: String,
        /// Override the source frame rate.
        #[arg(long)]
        fps: Option<f64>,
        /// Frames per second sent to the detector.
        #[arg(long)]
        target_rate: Option<f64>,
        /// Evaluate every Nth frame (overrides --target-rate).
        #[arg(long)]
        frame_skip: Option<u32>,
        /// Keep best frames and write one artifact per track.
        #[arg(long)]
        retain_frames: bool,
        /// Length of a stub:// clip.
        #[arg(long, default_value_t = 30)]
        synthetic_frames: u64,
    },
    /// Report whether the detector loads.
    Health,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = EngineConfig::load().context("load configuration")?;
    if let Some(out) = &args.out {
        cfg.artifacts.root = out.clone();
    }
    if args.no_render {
        cfg.artifacts.render = false;
    }

    let script = args.script.clone();
    let model = ModelHandle::init(move || {
        let detector = ScriptedDetector::from_file(&script)?;
        Ok(Box::new(detector) as Box<dyn Detector>)
    });

    let outcome = match args.command {
        Command::Health => return print_json(&health(&model)),
        Command::Image { file } => run_image(&cfg, model, &file)?,
        Command::Video {
            source,
            fps,
            target_rate,
            frame_skip,
            retain_frames,
            synthetic_frames,
        } => {
            if let Some(rate) = target_rate {
                cfg.sampling.target_rate = rate;
            }
            if frame_skip.is_some() {
                cfg.sampling.frame_skip = frame_skip;
            }
            if retain_frames {
                cfg.retain_source_frames = true;
            }
            let file_cfg = FileConfig {
                path: source,
                fps,
                synthetic_frames,
            };
            run_video(&cfg, model, file_cfg)?
        }
    };

    match outcome {
        Ok(result) => {
            let top = result.top_prediction();
            log::info!("top prediction: {} ({:.2})", top.class_name, top.confidence);
            print_json(&result)
        }
        Err(err) => {
            print_json(&err.to_payload())?;
            log::error!("job failed ({}): {}", err.status_code(), err);
            std::process::exit(1);
        }
    }
}

fn run_image(
    cfg: &EngineConfig,
    model: ModelHandle,
    file: &Path,
) -> Result<Result<JobResult, PipelineError>> {
    let bytes = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let sink = Arc::new(FilesystemArtifactSink::new(&cfg.artifacts.root)?);
    let frame = match ImageDecoder.decode(&bytes) {
        Ok(frame) => frame,
        Err(err) => return Ok(Err(err)),
    };
    let job = ImageJob::new(model, sink, cfg.job_settings());
    Ok(job.run(&frame))
}

fn run_video(
    cfg: &EngineConfig,
    model: ModelHandle,
    file_cfg: FileConfig,
) -> Result<Result<JobResult, PipelineError>> {
    let mut source = FileSource::open(file_cfg)?;
    let sink = Arc::new(FilesystemArtifactSink::new(&cfg.artifacts.root)?);
    let settings = cfg.job_settings();
    if settings.retention == FrameRetention::Retain {
        log::info!("retaining best frames for per-track artifacts");
    }
    let job = VideoJob::new(model, sink, settings);

    let cancel = job.cancel_flag();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received; cancelling video job");
        cancel.cancel();
    })
    .context("install Ctrl-C handler")?;

    Ok(job.run(&mut source))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
