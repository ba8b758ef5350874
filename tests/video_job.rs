use std::sync::atomic::Ordering;
use std::sync::Arc;

use bestshot::{
    ClassTable, FileConfig, FileSource, Frame, FrameRetention, FrameSequence,
    InMemoryArtifactSink, JobSettings, MediaKind, ModelHandle, PipelineError, Prediction,
    RawDetection, SamplingPolicy, ScriptedDetector, VideoJob,
};

fn clip(frames: usize, fps: f64) -> FrameSequence {
    FrameSequence::new(
        fps,
        (0..frames).map(|_| Frame::from_rgb(vec![10u8; 16 * 16 * 3], 16, 16).expect("frame")),
    )
}

fn tracked(track_id: u64, confidence: f32) -> RawDetection {
    RawDetection::new(0, confidence, [1.0, 1.0, 12.0, 12.0]).with_track(track_id)
}

fn settings(retention: FrameRetention, render: bool) -> JobSettings {
    JobSettings {
        retention,
        render,
        detector_timeout: None,
        sampling: SamplingPolicy {
            target_rate: 10.0,
            frame_skip: Some(1),
        },
        ..JobSettings::default()
    }
}

fn two_track_detector() -> ScriptedDetector {
    ScriptedDetector::new(ClassTable::from_names(["beagle"]))
        .push_frame(vec![tracked(5, 0.30), tracked(2, 0.60)])
        .push_frame(vec![tracked(5, 0.95)])
        .push_frame(vec![tracked(2, 0.55), tracked(5, 0.40)])
}

fn track_ids(predictions: &[Prediction]) -> Vec<u64> {
    predictions
        .iter()
        .map(|p| match p {
            Prediction::Track(t) => t.track_id,
            Prediction::Detection(_) => panic!("video results hold track predictions"),
        })
        .collect()
}

#[test]
fn discard_mode_orders_by_confidence_and_writes_frame_sequence() {
    let sink = Arc::new(InMemoryArtifactSink::new());
    let job = VideoJob::new(
        ModelHandle::from_detector(two_track_detector()),
        sink.clone(),
        settings(FrameRetention::Discard, true),
    );
    let result = job.run(&mut clip(3, 30.0)).expect("job");

    assert_eq!(result.media_type, MediaKind::Video);
    assert_eq!(track_ids(&result.predictions), vec![5, 2]);
    assert!(result.artifact_reference.is_some());
    // Three annotated frames plus the manifest.
    assert_eq!(sink.len(), 4);
    assert!(sink.names().iter().any(|n| n.ends_with(".json")));
}

#[test]
fn retain_mode_orders_by_track_id_with_one_artifact_each() {
    let sink = Arc::new(InMemoryArtifactSink::new());
    let job = VideoJob::new(
        ModelHandle::from_detector(two_track_detector()),
        sink.clone(),
        settings(FrameRetention::Retain, true),
    );
    let result = job.run(&mut clip(3, 30.0)).expect("job");

    assert_eq!(track_ids(&result.predictions), vec![2, 5]);
    assert!(result.artifact_reference.is_none());
    let mut references = Vec::new();
    for prediction in &result.predictions {
        let Prediction::Track(track) = prediction else {
            unreachable!()
        };
        references.push(track.artifact_reference.clone().expect("per-track artifact"));
    }
    assert_ne!(references[0], references[1]);
    assert_eq!(sink.len(), 2);
    assert!(sink.names().iter().all(|n| n.starts_with("track_")));

    let Prediction::Track(best) = &result.predictions[1] else {
        unreachable!()
    };
    assert_eq!(best.confidence, 0.95);
    assert_eq!(best.frame_index, 1);
}

#[test]
fn default_sampling_sends_every_third_frame_at_30_fps() {
    let detector = ScriptedDetector::new(ClassTable::from_names(["beagle"]));
    let calls = detector.call_counter();
    let mut job_settings = settings(FrameRetention::Discard, true);
    job_settings.sampling = SamplingPolicy::default();
    let sink = Arc::new(InMemoryArtifactSink::new());
    let job = VideoJob::new(ModelHandle::from_detector(detector), sink.clone(), job_settings);

    job.run(&mut clip(30, 30.0)).expect("job");
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    // Unsampled frames still reach the output sequence.
    assert_eq!(sink.len(), 31);
}

#[test]
fn no_tracked_detections_is_an_empty_result_not_an_error() {
    let detector = ScriptedDetector::new(ClassTable::from_names(["beagle"]))
        .push_frame(vec![RawDetection::new(0, 0.9, [0.0, 0.0, 5.0, 5.0])]);
    let job = VideoJob::new(
        ModelHandle::from_detector(detector),
        Arc::new(InMemoryArtifactSink::new()),
        settings(FrameRetention::Retain, false),
    );
    let result = job.run(&mut clip(2, 30.0)).expect("job");
    assert!(result.predictions.is_empty());
    assert_eq!(result.top_prediction().class_name, "unknown");
}

#[test]
fn detector_failure_aborts_with_internal_error() {
    let detector = ScriptedDetector::new(ClassTable::from_names(["beagle"])).fail_on_call(1);
    let job = VideoJob::new(
        ModelHandle::from_detector(detector),
        Arc::new(InMemoryArtifactSink::new()),
        settings(FrameRetention::Discard, false),
    );
    let err = job.run(&mut clip(3, 30.0)).unwrap_err();
    assert!(matches!(err, PipelineError::Internal(_)));
    assert_eq!(err.to_payload().status, "error");
}

#[test]
fn stub_file_source_runs_end_to_end() {
    let mut config = FileConfig::new("stub://driveway");
    config.synthetic_frames = 12;
    let mut source = FileSource::open(config).expect("stub source");
    let detector = ScriptedDetector::new(ClassTable::from_names(["beagle", "pug"]))
        .push_frame(vec![tracked(1, 0.5)])
        .push_frame(vec![tracked(1, 0.7), tracked(3, 0.2)]);
    let mut job_settings = settings(FrameRetention::Discard, false);
    job_settings.sampling = SamplingPolicy::default();
    let job = VideoJob::new(
        ModelHandle::from_detector(detector),
        Arc::new(InMemoryArtifactSink::new()),
        job_settings,
    );
    let result = job.run(&mut source).expect("job");
    assert_eq!(track_ids(&result.predictions), vec![1]);
}
