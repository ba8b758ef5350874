use anyhow::Result;

use crate::detect::result::{ClassTable, RawDetection};
use crate::frame::Frame;

/// Handle tying successive `track` calls to one aggregation scope.
///
/// Track ids are only meaningful within the handle that produced them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackSessionId(String);

impl TrackSessionId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// A fresh handle with a random token.
    pub fn generate() -> Self {
        Self(crate::unique_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object detector collaborator.
///
/// The engine never looks inside a detector; it only relies on this contract.
/// Implementations may be slow or block; callers bound each call with a
/// timeout and never call concurrently on the same instance.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class-id to name table used to label detections.
    fn class_table(&self) -> ClassTable;

    /// Stateless single-frame detection. Returned rows carry no track id.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Stateful detection with persistent track ids across calls that share `session`.
    fn track(&mut self, frame: &Frame, session: &TrackSessionId) -> Result<Vec<RawDetection>>;

    /// Release tracker state held for `session`.
    fn end_session(&mut self, _session: &TrackSessionId) {}

    /// Optional warm-up hook, run once at model initialization.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Which detector operation to run for a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectorCall {
    Detect,
    Track(TrackSessionId),
}

impl DetectorCall {
    pub(crate) fn run(
        &self,
        detector: &mut dyn Detector,
        frame: &Frame,
    ) -> Result<Vec<RawDetection>> {
        match self {
            DetectorCall::Detect => detector.detect(frame),
            DetectorCall::Track(session) => detector.track(frame, session),
        }
    }
}
