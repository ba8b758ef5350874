//! Best-shot tracking and capture-session engine.
//!
//! The engine consumes per-frame detections from an external object detector
//! and produces:
//!
//! - a **best-shot record per tracked object**: the highest-confidence
//!   detection seen for each track id across a whole video;
//! - for live sessions, a single **capture event** the moment any detection
//!   crosses the capture threshold, after which the session ends.
//!
//! # Module Structure
//!
//! - `detect`: detector trait, process-wide model handle, scripted detector
//! - `normalize`: raw detector rows to canonical `Detection`s
//! - `aggregate`: per-scope best-per-track fold
//! - `sampling`: which video frames reach the detector
//! - `session`: live capture state machine and its transport driver
//! - `job`: image and video batch jobs
//! - `assemble`: result ordering and serialization
//! - `ingest`, `render`, `artifact`: frame input, annotation, artifact output
//! - `config`: file + environment configuration

use rand::RngCore;

pub mod aggregate;
pub mod artifact;
pub mod assemble;
pub mod config;
pub mod detect;
pub mod detection;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod job;
pub mod normalize;
pub mod render;
pub mod sampling;
pub mod session;

pub use aggregate::{AggregationScope, FrameRetention, TrackRecord, UpdateSummary};
pub use artifact::{
    ArtifactRef, ArtifactSink, FilesystemArtifactSink, FrameEncoder, InMemoryArtifactSink,
    SequenceEncoder,
};
pub use assemble::{JobResult, MediaKind, Prediction, RecordOrder, TopPrediction, TrackPrediction};
pub use config::EngineConfig;
pub use detect::{
    CallSlot, ClassTable, Detector, ModelHandle, RawDetection, ScriptedDetector, TrackSessionId,
};
pub use detection::{BoundingBox, Detection};
pub use error::{FailurePayload, PipelineError, Recovery};
pub use frame::Frame;
pub use ingest::{FileConfig, FileSource, FrameDecoder, FrameSequence, ImageDecoder, VideoSource};
pub use job::{CancelFlag, ImageJob, JobSettings, VideoJob};
pub use sampling::{frame_skip, FrameSampler, SamplingPolicy};
pub use session::{
    run_session, CaptureSession, CaptureSettings, SessionEvent, SessionOutcome, SessionState,
    SessionTransport, StreamMode,
};

/// Random 128-bit token, hex encoded. Used for artifact names and scope handles.
pub fn unique_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Readiness probe for a hosting service.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Health {
    pub status: &'static str,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector: Option<&'static str>,
}

pub fn health(model: &ModelHandle) -> Health {
    Health {
        status: if model.ready() { "ok" } else { "unavailable" },
        model_loaded: model.ready(),
        detector: model.name(),
    }
}
