use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use anyhow::Result;

use bestshot::{
    ClassTable, Detector, FilesystemArtifactSink, Frame, FrameRetention, FrameSequence,
    JobResult, JobSettings, ModelHandle, Prediction, RawDetection, SamplingPolicy,
    TrackSessionId, VideoJob,
};

/// Sees one shared object (track 1) in every clip, plus one object whose track
/// id is the clip's fill byte.
struct FillDetector;

impl Detector for FillDetector {
    fn name(&self) -> &'static str {
        "fill"
    }

    fn class_table(&self) -> ClassTable {
        ClassTable::from_names(["beagle", "pug"])
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let mut rows = self.track(frame, &TrackSessionId::new("detect"))?;
        for row in &mut rows {
            row.track_id = None;
        }
        Ok(rows)
    }

    fn track(&mut self, frame: &Frame, _session: &TrackSessionId) -> Result<Vec<RawDetection>> {
        let fill = frame.pixels().first().copied().unwrap_or_default();
        let confidence = 0.5 + (frame.index % 10) as f32 * 0.04;
        Ok(vec![
            RawDetection::new(0, confidence, [1.0, 1.0, 6.0, 6.0]).with_track(1),
            RawDetection::new(1, confidence, [2.0, 2.0, 9.0, 9.0]).with_track(u64::from(fill)),
        ])
    }
}

fn clip(fill: u8, frames: usize) -> FrameSequence {
    FrameSequence::new(
        30.0,
        (0..frames).map(move |_| {
            Frame::from_rgb(vec![fill; 12 * 12 * 3], 12, 12).expect("frame")
        }),
    )
}

fn run_clip(model: ModelHandle, sink: Arc<FilesystemArtifactSink>, fill: u8) -> JobResult {
    let settings = JobSettings {
        retention: FrameRetention::Retain,
        detector_timeout: None,
        sampling: SamplingPolicy {
            target_rate: 10.0,
            frame_skip: Some(1),
        },
        ..JobSettings::default()
    };
    VideoJob::new(model, sink, settings)
        .run(&mut clip(fill, 20))
        .expect("job")
}

fn tracks(result: &JobResult) -> Vec<(u64, String)> {
    result
        .predictions
        .iter()
        .map(|p| match p {
            Prediction::Track(t) => (
                t.track_id,
                t.artifact_reference
                    .as_ref()
                    .expect("per-track artifact")
                    .to_string(),
            ),
            Prediction::Detection(_) => panic!("video results hold track predictions"),
        })
        .collect()
}

#[test]
fn concurrent_jobs_share_model_and_sink_but_not_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = Arc::new(FilesystemArtifactSink::new(dir.path()).expect("sink"));
    let model = ModelHandle::from_detector(FillDetector);

    let workers: Vec<_> = [10u8, 20u8]
        .into_iter()
        .map(|fill| {
            let model = model.clone();
            let sink = Arc::clone(&sink);
            thread::spawn(move || (fill, run_clip(model, sink, fill)))
        })
        .collect();

    let mut references = HashSet::new();
    for worker in workers {
        let (fill, result) = worker.join().expect("worker");
        let tracks = tracks(&result);
        let ids: Vec<u64> = tracks.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, u64::from(fill)]);
        for (_, reference) in tracks {
            assert!(references.insert(reference), "artifact names must not collide");
        }
    }
    assert_eq!(references.len(), 4);
    assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 4);
}
