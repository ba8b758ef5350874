//! Track aggregator.
//!
//! An `AggregationScope` keeps the best detection seen for every track id of
//! one video job or one live session. Updates are a sequential fold over frame
//! order; the scope is owned by exactly one job or session and is never shared.

use std::collections::HashMap;

use serde::Serialize;

use crate::detect::TrackSessionId;
use crate::detection::Detection;
use crate::frame::Frame;

/// Whether a scope keeps the frame each best detection came from.
///
/// Retaining frames lets per-track artifacts be rendered after the pass, at the
/// cost of one frame buffer per live track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameRetention {
    #[default]
    Discard,
    Retain,
}

/// Best detection observed for one track id.
#[derive(Clone, Debug, Serialize)]
pub struct TrackRecord {
    pub track_id: u64,
    pub best_detection: Detection,
    /// Zero-based index of the frame the best detection came from.
    pub frame_index: u64,
    #[serde(skip)]
    pub source_frame: Option<Frame>,
}

/// Counts from one `update` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub created: usize,
    pub improved: usize,
    pub untracked: usize,
}

pub struct AggregationScope {
    id: TrackSessionId,
    retention: FrameRetention,
    // First-sighting order; `index` maps track id to position.
    records: Vec<TrackRecord>,
    index: HashMap<u64, usize>,
    frames_folded: u64,
}

impl AggregationScope {
    pub fn new(retention: FrameRetention) -> Self {
        Self {
            id: TrackSessionId::generate(),
            retention,
            records: Vec::new(),
            index: HashMap::new(),
            frames_folded: 0,
        }
    }

    /// Handle passed to the detector's `track` call for this scope.
    pub fn id(&self) -> &TrackSessionId {
        &self.id
    }

    pub fn retention(&self) -> FrameRetention {
        self.retention
    }

    /// Fold one frame's detections into the scope.
    ///
    /// A record is replaced only on strictly greater confidence, so ties keep
    /// the earlier sighting. Detections without a track id are ignored.
    pub fn update(&mut self, frame: &Frame, detections: &[Detection]) -> UpdateSummary {
        let mut summary = UpdateSummary::default();
        for det in detections {
            let Some(track_id) = det.track_id else {
                summary.untracked += 1;
                continue;
            };
            match self.index.get(&track_id) {
                Some(&pos) => {
                    let record = &mut self.records[pos];
                    if det.confidence > record.best_detection.confidence {
                        record.best_detection = det.clone();
                        record.frame_index = frame.index;
                        if self.retention == FrameRetention::Retain {
                            record.source_frame = Some(frame.clone());
                        }
                        summary.improved += 1;
                    }
                }
                None => {
                    self.index.insert(track_id, self.records.len());
                    self.records.push(TrackRecord {
                        track_id,
                        best_detection: det.clone(),
                        frame_index: frame.index,
                        source_frame: match self.retention {
                            FrameRetention::Retain => Some(frame.clone()),
                            FrameRetention::Discard => None,
                        },
                    });
                    summary.created += 1;
                }
            }
        }
        self.frames_folded += 1;
        summary
    }

    /// Snapshot of all records in first-sighting order. Does not mutate the scope.
    pub fn finalize(&self) -> Vec<TrackRecord> {
        self.records.clone()
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackRecord> {
        self.index.get(&track_id).map(|&pos| &self.records[pos])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn frames_folded(&self) -> u64 {
        self.frames_folded
    }

    /// Bytes held by retained source frames. Frames shared between records
    /// are counted once per record.
    pub fn retained_bytes(&self) -> usize {
        self.records
            .iter()
            .filter_map(|r| r.source_frame.as_ref())
            .map(Frame::byte_len)
            .sum()
    }
}

impl std::fmt::Debug for AggregationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationScope")
            .field("id", &self.id)
            .field("retention", &self.retention)
            .field("tracks", &self.records.len())
            .field("frames_folded", &self.frames_folded)
            .finish()
    }
}
