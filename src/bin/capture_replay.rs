//! capture_replay - replay a directory of encoded frames as a live session
//!
//! Each image file is sent as one inbound message, in file-name order. Every
//! session event is printed to stdout as one JSON line; the session summary
//! goes to the log.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use bestshot::ingest::file::list_images;
use bestshot::{
    run_session, CaptureSession, Detector, EngineConfig, FilesystemArtifactSink, ImageDecoder,
    ModelHandle, ScriptedDetector, SessionEvent, SessionTransport, StreamMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of JPEG/PNG frames.
    frames: PathBuf,
    /// Detector script (JSON) replayed as model output.
    #[arg(long, env = "BESTSHOT_DETECTOR_SCRIPT")]
    script: PathBuf,
    /// Artifact directory (overrides artifacts.root).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Capture threshold (overrides capture.threshold).
    #[arg(long)]
    threshold: Option<f32>,
    /// Stream mode: track or detect.
    #[arg(long)]
    mode: Option<StreamMode>,
}

struct DirectoryReplay {
    pending: VecDeque<PathBuf>,
}

impl SessionTransport for DirectoryReplay {
    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        log::debug!("replaying {}", path.display());
        Ok(Some(bytes))
    }

    fn send(&mut self, event: &SessionEvent) -> Result<()> {
        println!("{}", serde_json::to_string(event)?);
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = EngineConfig::load().context("load configuration")?;
    if let Some(out) = args.out {
        cfg.artifacts.root = out;
    }
    if let Some(threshold) = args.threshold {
        cfg.capture_threshold = threshold;
    }
    if let Some(mode) = args.mode {
        cfg.stream_mode = mode;
    }

    let script = args.script;
    let model = ModelHandle::init(move || {
        let detector = ScriptedDetector::from_file(&script)?;
        Ok(Box::new(detector) as Box<dyn Detector>)
    });
    let sink = Arc::new(FilesystemArtifactSink::new(&cfg.artifacts.root)?);
    let session = CaptureSession::new(
        model,
        Arc::new(ImageDecoder),
        sink,
        cfg.capture_settings(),
    );

    let mut transport = DirectoryReplay {
        pending: list_images(&args.frames)?.into(),
    };
    let outcome = run_session(session, &mut transport);
    log::info!(
        "session ended in {:?}: {} frames received, {} evaluated, {} events",
        outcome.final_state,
        outcome.frames_received,
        outcome.frames_evaluated,
        outcome.events_sent
    );
    Ok(())
}
