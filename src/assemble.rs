//! Result assembler: ordering and serialization of job results.

use serde::Serialize;

use crate::aggregate::TrackRecord;
use crate::artifact::ArtifactRef;
use crate::detection::{BoundingBox, Detection};

/// Sort detections by confidence, highest first. Stable: equal confidences
/// keep detector order.
pub fn sort_by_confidence(detections: &mut [Detection]) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// Ordering applied to a video job's track records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOrder {
    /// Confidence descending; used when no per-track artifact exists.
    Confidence,
    /// Track id ascending; used when each record owns a saved artifact.
    TrackId,
}

pub fn sort_records(records: &mut [TrackRecord], order: RecordOrder) {
    match order {
        RecordOrder::Confidence => records.sort_by(|a, b| {
            b.best_detection
                .confidence
                .total_cmp(&a.best_detection.confidence)
        }),
        RecordOrder::TrackId => records.sort_by_key(|r| r.track_id),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Best-shot summary of one track in a video job result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackPrediction {
    pub track_id: u64,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub frame_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_reference: Option<ArtifactRef>,
}

impl TrackPrediction {
    pub fn from_record(record: &TrackRecord, artifact_reference: Option<ArtifactRef>) -> Self {
        Self {
            track_id: record.track_id,
            class_name: record.best_detection.class_name.clone(),
            confidence: record.best_detection.confidence,
            bbox: record.best_detection.bbox,
            frame_index: record.frame_index,
            artifact_reference,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Prediction {
    Detection(Detection),
    Track(TrackPrediction),
}

impl Prediction {
    pub fn class_name(&self) -> &str {
        match self {
            Prediction::Detection(d) => &d.class_name,
            Prediction::Track(t) => &t.class_name,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Prediction::Detection(d) => d.confidence,
            Prediction::Track(t) => t.confidence,
        }
    }
}

/// Class and confidence of a result's leading prediction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopPrediction {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
}

/// Successful batch job result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobResult {
    pub status: &'static str,
    pub predictions: Vec<Prediction>,
    pub artifact_reference: Option<ArtifactRef>,
    pub media_type: MediaKind,
}

impl JobResult {
    /// Image or frame result, sorted by confidence.
    pub fn from_detections(
        mut detections: Vec<Detection>,
        artifact_reference: Option<ArtifactRef>,
    ) -> Self {
        sort_by_confidence(&mut detections);
        Self {
            status: "ok",
            predictions: detections.into_iter().map(Prediction::Detection).collect(),
            artifact_reference,
            media_type: MediaKind::Image,
        }
    }

    /// Video result. Records are sorted by `order`; `artifacts` pairs each
    /// track id with its saved artifact, if any.
    pub fn from_tracks(
        mut records: Vec<TrackRecord>,
        order: RecordOrder,
        artifacts: &[(u64, ArtifactRef)],
        artifact_reference: Option<ArtifactRef>,
    ) -> Self {
        sort_records(&mut records, order);
        let predictions = records
            .iter()
            .map(|record| {
                let artifact = artifacts
                    .iter()
                    .find(|(id, _)| *id == record.track_id)
                    .map(|(_, r)| r.clone());
                Prediction::Track(TrackPrediction::from_record(record, artifact))
            })
            .collect();
        Self {
            status: "ok",
            predictions,
            artifact_reference,
            media_type: MediaKind::Video,
        }
    }

    /// First prediction, or `unknown` at zero confidence when empty.
    pub fn top_prediction(&self) -> TopPrediction {
        match self.predictions.first() {
            Some(p) => TopPrediction {
                class_name: p.class_name().to_string(),
                confidence: p.confidence(),
            },
            None => TopPrediction {
                class_name: "unknown".to_string(),
                confidence: 0.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(name: &str, confidence: f32) -> Detection {
        Detection {
            class_id: 0,
            class_name: name.into(),
            confidence,
            bbox: BoundingBox::new(0, 0, 1, 1),
            track_id: None,
        }
    }

    fn record(track_id: u64, confidence: f32) -> TrackRecord {
        TrackRecord {
            track_id,
            best_detection: det("pug", confidence),
            frame_index: 0,
            source_frame: None,
        }
    }

    #[test]
    fn confidence_sort_is_stable() {
        let mut dets = vec![det("a", 0.5), det("b", 0.9), det("c", 0.5)];
        sort_by_confidence(&mut dets);
        let names: Vec<&str> = dets.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn records_sort_by_either_key() {
        let mut records = vec![record(3, 0.2), record(1, 0.7), record(2, 0.2)];
        sort_records(&mut records, RecordOrder::Confidence);
        let ids: Vec<u64> = records.iter().map(|r| r.track_id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        sort_records(&mut records, RecordOrder::TrackId);
        let ids: Vec<u64> = records.iter().map(|r| r.track_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn top_prediction_falls_back_to_unknown() {
        let empty = JobResult::from_detections(Vec::new(), None);
        assert_eq!(empty.top_prediction().class_name, "unknown");
        assert_eq!(empty.top_prediction().confidence, 0.0);

        let result = JobResult::from_detections(vec![det("a", 0.3), det("b", 0.8)], None);
        assert_eq!(result.top_prediction().class_name, "b");
    }

    #[test]
    fn video_result_serializes_track_artifacts() {
        let artifacts = vec![(1, ArtifactRef::new("mem://track_1.jpg"))];
        let result = JobResult::from_tracks(
            vec![record(2, 0.9), record(1, 0.4)],
            RecordOrder::TrackId,
            &artifacts,
            None,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["media_type"], "video");
        assert_eq!(json["predictions"][0]["track_id"], 1);
        assert_eq!(json["predictions"][0]["artifact_reference"], "mem://track_1.jpg");
        assert!(json["predictions"][1].get("artifact_reference").is_none());
    }
}
