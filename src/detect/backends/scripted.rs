use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::{Detector, TrackSessionId};
use crate::detect::result::{ClassTable, RawDetection};
use crate::frame::Frame;

/// Replays pre-recorded detector output, one entry per call.
///
/// Stands in for the external model service in tests and in the command-line
/// tools. Calls past the end of the script return no detections.
pub struct ScriptedDetector {
    classes: ClassTable,
    frames: VecDeque<Vec<RawDetection>>,
    delay: Option<Duration>,
    fail_on_call: Option<usize>,
    calls: Arc<AtomicUsize>,
}

/// On-disk script format.
///
/// ```json
/// { "classes": ["beagle", "pug"],
///   "frames": [[{"class_id": 0, "confidence": 0.4, "box": [10, 10, 50, 60], "track_id": 7}], []] }
/// ```
#[derive(Debug, Deserialize)]
struct DetectorScript {
    classes: Vec<String>,
    #[serde(default)]
    frames: Vec<Vec<RawDetection>>,
}

impl ScriptedDetector {
    pub fn new(classes: ClassTable) -> Self {
        Self {
            classes,
            frames: VecDeque::new(),
            delay: None,
            fail_on_call: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Load a script from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detector script {}", path.display()))?;
        let script: DetectorScript = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detector script {}: {}", path.display(), e))?;
        let mut detector = Self::new(ClassTable::from_names(script.classes));
        detector.frames = script.frames.into();
        Ok(detector)
    }

    /// Append the output for the next call.
    pub fn push_frame(mut self, detections: Vec<RawDetection>) -> Self {
        self.frames.push_back(detections);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return an error on the given zero-based call.
    pub fn fail_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Shared counter of detector invocations, readable after the detector is
    /// moved into a `ModelHandle`.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn next_output(&mut self) -> Result<Vec<RawDetection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_on_call == Some(call) {
            return Err(anyhow!("scripted failure on call {}", call));
        }
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn class_table(&self) -> ClassTable {
        self.classes.clone()
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        let mut rows = self.next_output()?;
        for row in &mut rows {
            row.track_id = None;
        }
        Ok(rows)
    }

    fn track(&mut self, _frame: &Frame, _session: &TrackSessionId) -> Result<Vec<RawDetection>> {
        self.next_output()
    }
}
