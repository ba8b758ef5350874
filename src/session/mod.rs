//! Live capture sessions.
//!
//! A `CaptureSession` evaluates one inbound frame at a time and fires a single
//! terminal `captured` event as soon as any detection strictly exceeds the
//! capture threshold. Nothing is evaluated after a terminal state.
//!
//! ```text
//! Open ──start──> AwaitingFrame ──frame──> Evaluating ──> AwaitingFrame
//!   │                  │                       ├──> Captured (terminal)
//!   └──> Rejected      └──> Closed             └──> Failed   (terminal)
//! ```

pub mod driver;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregationScope, FrameRetention, TrackRecord};
use crate::artifact::{self, ArtifactRef, ArtifactSink};
use crate::detect::{CallSlot, DetectorCall, ModelHandle};
use crate::detection::Detection;
use crate::error::{PipelineError, Recovery};
use crate::frame::Frame;
use crate::ingest::FrameDecoder;
use crate::normalize::normalize;
use crate::render;

pub use driver::{run_session, SessionOutcome, SessionTransport};

pub const DEFAULT_CAPTURE_THRESHOLD: f32 = 0.8;

/// How a session calls the detector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Stateful tracking; detections are folded into the session's scope.
    #[default]
    Track,
    /// Stateless per-frame detection with no scope.
    Detect,
}

impl FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "track" => Ok(StreamMode::Track),
            "detect" => Ok(StreamMode::Detect),
            other => Err(format!("unknown stream mode {:?} (expected track or detect)", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    AwaitingFrame,
    Evaluating,
    Captured,
    Rejected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Captured
                | SessionState::Rejected
                | SessionState::Failed
                | SessionState::Closed
        )
    }
}

/// Outbound live-session message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionEvent {
    Ok {
        detections: Vec<Detection>,
    },
    Captured {
        artifact_reference: Option<ArtifactRef>,
        detections: Vec<Detection>,
        best: Detection,
    },
    Error {
        message: String,
    },
}

impl SessionEvent {
    fn error(err: &PipelineError) -> Self {
        SessionEvent::Error {
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// A detection must strictly exceed this to trigger a capture.
    pub threshold: f32,
    pub mode: StreamMode,
    pub min_confidence: f32,
    pub detector_timeout: Option<Duration>,
    /// Render and store an annotated image on capture.
    pub render: bool,
    pub jpeg_quality: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CAPTURE_THRESHOLD,
            mode: StreamMode::Track,
            min_confidence: crate::config::DEFAULT_MIN_CONFIDENCE,
            detector_timeout: Some(crate::config::DEFAULT_DETECTOR_TIMEOUT),
            render: true,
            jpeg_quality: crate::config::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// State of one live connection.
pub struct CaptureSession {
    id: String,
    model: ModelHandle,
    decoder: Arc<dyn FrameDecoder>,
    sink: Arc<dyn ArtifactSink>,
    settings: CaptureSettings,
    state: SessionState,
    scope: Option<AggregationScope>,
    calls: CallSlot,
    frames_received: u64,
    frames_evaluated: u64,
}

impl CaptureSession {
    pub fn new(
        model: ModelHandle,
        decoder: Arc<dyn FrameDecoder>,
        sink: Arc<dyn ArtifactSink>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            id: crate::unique_token(),
            model,
            decoder,
            sink,
            settings,
            state: SessionState::Open,
            scope: None,
            calls: CallSlot::new(),
            frames_received: 0,
            frames_evaluated: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn frames_evaluated(&self) -> u64 {
        self.frames_evaluated
    }

    /// Best-per-track records so far. Empty in `detect` mode.
    pub fn tracks(&self) -> Vec<TrackRecord> {
        self.scope
            .as_ref()
            .map(AggregationScope::finalize)
            .unwrap_or_default()
    }

    /// Accept the connection. Returns an error event and moves to `Rejected`
    /// when the model is unavailable.
    pub fn start(&mut self) -> Option<SessionEvent> {
        if self.state != SessionState::Open {
            return None;
        }
        if let Err(err) = self.model.ensure_ready() {
            log::warn!("CaptureSession {}: rejected: {}", self.id, err);
            self.state = SessionState::Rejected;
            return Some(SessionEvent::error(&err));
        }
        if self.settings.mode == StreamMode::Track {
            self.scope = Some(AggregationScope::new(FrameRetention::Discard));
        }
        self.state = SessionState::AwaitingFrame;
        log::info!(
            "CaptureSession {}: open (mode {:?}, threshold {})",
            self.id,
            self.settings.mode,
            self.settings.threshold
        );
        None
    }

    /// Evaluate one inbound message.
    ///
    /// Returns the event to send back, or `None` once the session is terminal.
    pub fn handle_frame(&mut self, payload: &[u8]) -> Option<SessionEvent> {
        if self.state == SessionState::Open {
            if let Some(event) = self.start() {
                return Some(event);
            }
        }
        if self.state.is_terminal() {
            log::debug!("CaptureSession {}: ignoring frame after {:?}", self.id, self.state);
            return None;
        }

        let index = self.frames_received;
        self.frames_received += 1;
        let frame = match self.decoder.decode(payload) {
            Ok(frame) => frame.with_index(index),
            Err(err) => return Some(self.fail_frame(index, err)),
        };

        self.state = SessionState::Evaluating;
        match self.evaluate(&frame) {
            Ok(event) => Some(event),
            Err(err) => Some(self.fail_frame(index, err)),
        }
    }

    /// Peer went away. Silent; terminal states are kept as they are.
    pub fn disconnect(&mut self) {
        if !self.state.is_terminal() {
            log::info!(
                "CaptureSession {}: closed after {} frames",
                self.id,
                self.frames_received
            );
            self.state = SessionState::Closed;
        }
        self.release();
    }

    fn evaluate(&mut self, frame: &Frame) -> Result<SessionEvent, PipelineError> {
        let call = match &self.scope {
            Some(scope) => DetectorCall::Track(scope.id().clone()),
            None => DetectorCall::Detect,
        };
        let raw = self.model.invoke(
            &mut self.calls,
            frame,
            call,
            self.settings.detector_timeout,
        )?;
        let detections = normalize(raw, self.model.classes()?, self.settings.min_confidence);
        self.frames_evaluated += 1;
        if let Some(scope) = self.scope.as_mut() {
            scope.update(frame, &detections);
        }
        log::debug!(
            "CaptureSession {}: frame {} -> {} detections",
            self.id,
            frame.index,
            detections.len()
        );

        let Some(best) = select_capture(&detections, self.settings.threshold).cloned() else {
            self.state = SessionState::AwaitingFrame;
            return Ok(SessionEvent::Ok { detections });
        };

        let artifact_reference = if self.settings.render {
            let image = render::annotate(frame, &detections);
            Some(artifact::write_jpeg(
                self.sink.as_ref(),
                "capture",
                &image,
                self.settings.jpeg_quality,
            )?)
        } else {
            None
        };
        self.state = SessionState::Captured;
        log::info!(
            "CaptureSession {}: captured {} ({:.2}) at frame {}",
            self.id,
            best.class_name,
            best.confidence,
            frame.index
        );
        self.release();
        Ok(SessionEvent::Captured {
            artifact_reference,
            detections,
            best,
        })
    }

    fn fail_frame(&mut self, index: u64, err: PipelineError) -> SessionEvent {
        match err.recovery() {
            Recovery::SkipFrame => {
                log::warn!("CaptureSession {}: frame {} skipped: {}", self.id, index, err);
                self.state = SessionState::AwaitingFrame;
            }
            Recovery::Abort => {
                log::error!("CaptureSession {}: failed at frame {}: {}", self.id, index, err);
                self.state = SessionState::Failed;
                self.release();
            }
        }
        SessionEvent::error(&err)
    }

    fn release(&mut self) {
        if let Some(scope) = self.scope.take() {
            self.model.end_track_session(scope.id());
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mode", &self.settings.mode)
            .field("frames_received", &self.frames_received)
            .finish()
    }
}

/// Highest-confidence detection strictly above `threshold`; ties keep the
/// earliest.
pub fn select_capture(detections: &[Detection], threshold: f32) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for det in detections.iter().filter(|d| d.confidence > threshold) {
        match best {
            Some(current) if det.confidence <= current.confidence => {}
            _ => best = Some(det),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::InMemoryArtifactSink;
    use crate::detect::{ClassTable, RawDetection, ScriptedDetector};
    use crate::detection::BoundingBox;

    struct RawDecoder;

    impl FrameDecoder for RawDecoder {
        fn decode(&self, payload: &[u8]) -> Result<Frame, PipelineError> {
            if payload == b"bad" {
                return Err(PipelineError::Decode("bad payload".into()));
            }
            Frame::from_rgb(vec![0u8; 8 * 8 * 3], 8, 8)
        }
    }

    fn det(confidence: f32) -> Detection {
        Detection {
            class_id: 0,
            class_name: "beagle".into(),
            confidence,
            bbox: BoundingBox::new(0, 0, 2, 2),
            track_id: None,
        }
    }

    fn session(
        detector: ScriptedDetector,
        mode: StreamMode,
    ) -> (CaptureSession, Arc<InMemoryArtifactSink>) {
        let sink = Arc::new(InMemoryArtifactSink::new());
        let settings = CaptureSettings {
            mode,
            detector_timeout: None,
            ..CaptureSettings::default()
        };
        let session = CaptureSession::new(
            ModelHandle::from_detector(detector),
            Arc::new(RawDecoder),
            sink.clone(),
            settings,
        );
        (session, sink)
    }

    fn raw(confidence: f32) -> RawDetection {
        RawDetection::new(0, confidence, [1.0, 1.0, 6.0, 6.0]).with_track(1)
    }

    #[test]
    fn select_capture_is_strict_and_prefers_earliest_tie() {
        let dets = vec![det(0.8), det(0.9), det(0.9), det(0.85)];
        let best = select_capture(&dets, 0.8).unwrap();
        assert!(std::ptr::eq(best, &dets[1]));
        assert!(select_capture(&[det(0.8)], 0.8).is_none());
    }

    #[test]
    fn capture_fires_once_then_ignores_frames() {
        let detector = ScriptedDetector::new(ClassTable::from_names(["beagle"]))
            .push_frame(vec![raw(0.5)])
            .push_frame(vec![raw(0.85)])
            .push_frame(vec![raw(0.99)]);
        let calls = detector.call_counter();
        let (mut session, sink) = session(detector, StreamMode::Track);

        assert!(matches!(session.handle_frame(b"f0"), Some(SessionEvent::Ok { .. })));
        match session.handle_frame(b"f1") {
            Some(SessionEvent::Captured { best, artifact_reference, .. }) => {
                assert_eq!(best.confidence, 0.85);
                assert!(artifact_reference.is_some());
            }
            other => panic!("expected capture, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Captured);
        assert!(session.handle_frame(b"f2").is_none());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn decode_failure_keeps_session_open() {
        let detector = ScriptedDetector::new(ClassTable::from_names(["beagle"]))
            .push_frame(vec![raw(0.3)]);
        let (mut session, _) = session(detector, StreamMode::Detect);
        assert!(matches!(session.handle_frame(b"bad"), Some(SessionEvent::Error { .. })));
        assert_eq!(session.state(), SessionState::AwaitingFrame);
        match session.handle_frame(b"ok") {
            Some(SessionEvent::Ok { detections }) => {
                assert_eq!(detections.len(), 1);
                assert_eq!(detections[0].track_id, None);
            }
            other => panic!("expected ok, got {:?}", other),
        }
        assert!(session.tracks().is_empty());
    }

    #[test]
    fn unavailable_model_rejects_at_open() {
        let sink = Arc::new(InMemoryArtifactSink::new());
        let mut session = CaptureSession::new(
            ModelHandle::unavailable("weights missing"),
            Arc::new(RawDecoder),
            sink,
            CaptureSettings::default(),
        );
        assert!(matches!(session.start(), Some(SessionEvent::Error { .. })));
        assert_eq!(session.state(), SessionState::Rejected);
        assert!(session.handle_frame(b"f0").is_none());
        assert_eq!(session.frames_received(), 0);
    }

    #[test]
    fn detector_error_fails_the_session() {
        let detector = ScriptedDetector::new(ClassTable::from_names(["beagle"])).fail_on_call(0);
        let (mut session, _) = session(detector, StreamMode::Track);
        assert!(matches!(session.handle_frame(b"f0"), Some(SessionEvent::Error { .. })));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.handle_frame(b"f1").is_none());
    }

    #[test]
    fn track_mode_folds_detections_into_scope() {
        let detector = ScriptedDetector::new(ClassTable::from_names(["beagle"]))
            .push_frame(vec![raw(0.4)])
            .push_frame(vec![raw(0.7)])
            .push_frame(vec![raw(0.6)]);
        let (mut session, _) = session(detector, StreamMode::Track);
        for payload in [b"a", b"b", b"c"] {
            session.handle_frame(payload);
        }
        let tracks = session.tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].best_detection.confidence, 0.7);
        assert_eq!(tracks[0].frame_index, 1);
    }

    #[test]
    fn events_serialize_with_status_tag() {
        let json = serde_json::to_value(SessionEvent::Ok { detections: vec![] }).unwrap();
        assert_eq!(json["status"], "ok");
        let json = serde_json::to_value(SessionEvent::Error { message: "x".into() }).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "x");
    }

    #[test]
    fn stream_mode_parses() {
        assert_eq!("Track".parse::<StreamMode>().unwrap(), StreamMode::Track);
        assert_eq!("detect".parse::<StreamMode>().unwrap(), StreamMode::Detect);
        assert!("both".parse::<StreamMode>().is_err());
    }
}
