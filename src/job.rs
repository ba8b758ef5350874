//! Batch jobs: single images and whole videos.
//!
//! A video job owns one `AggregationScope` for its lifetime. Frames are pulled
//! in order, sampled, evaluated and folded strictly one after another; the
//! scope and any retained frames are dropped when the job returns, whether it
//! completed, failed or was cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregate::{AggregationScope, FrameRetention};
use crate::artifact::{self, ArtifactRef, ArtifactSink, FrameEncoder, SequenceEncoder};
use crate::assemble::{JobResult, RecordOrder};
use crate::detect::{CallSlot, ClassTable, DetectorCall, ModelHandle};
use crate::detection::Detection;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::VideoSource;
use crate::normalize::normalize;
use crate::render;
use crate::sampling::SamplingPolicy;

#[derive(Clone, Debug)]
pub struct JobSettings {
    pub min_confidence: f32,
    pub detector_timeout: Option<Duration>,
    pub sampling: SamplingPolicy,
    pub retention: FrameRetention,
    /// Produce annotated artifacts.
    pub render: bool,
    pub jpeg_quality: u8,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            min_confidence: crate::config::DEFAULT_MIN_CONFIDENCE,
            detector_timeout: Some(crate::config::DEFAULT_DETECTOR_TIMEOUT),
            sampling: SamplingPolicy::default(),
            retention: FrameRetention::Discard,
            render: true,
            jpeg_quality: crate::config::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Cooperative cancellation for a running video job.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Detect objects in one still image.
pub struct ImageJob {
    model: ModelHandle,
    sink: Arc<dyn ArtifactSink>,
    settings: JobSettings,
}

impl ImageJob {
    pub fn new(model: ModelHandle, sink: Arc<dyn ArtifactSink>, settings: JobSettings) -> Self {
        Self {
            model,
            sink,
            settings,
        }
    }

    pub fn run(&self, frame: &Frame) -> Result<JobResult, PipelineError> {
        self.model.ensure_ready()?;
        let classes = self.model.classes()?;
        let detections = detect_frame(
            &self.model,
            &mut CallSlot::new(),
            frame,
            DetectorCall::Detect,
            classes,
            &self.settings,
        )?;
        let artifact_reference = if self.settings.render {
            let image = render::annotate(frame, &detections);
            Some(artifact::write_jpeg(
                self.sink.as_ref(),
                "image",
                &image,
                self.settings.jpeg_quality,
            )?)
        } else {
            None
        };
        log::info!(
            "ImageJob: {}x{} frame -> {} detections",
            frame.width,
            frame.height,
            detections.len()
        );
        Ok(JobResult::from_detections(detections, artifact_reference))
    }
}

/// Counters from one pass over a video.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub frames_read: u64,
    pub frames_evaluated: u64,
    pub frames_skipped: u64,
}

/// Best-shot extraction over a whole video.
pub struct VideoJob {
    id: String,
    model: ModelHandle,
    sink: Arc<dyn ArtifactSink>,
    settings: JobSettings,
    cancel: CancelFlag,
}

impl VideoJob {
    pub fn new(model: ModelHandle, sink: Arc<dyn ArtifactSink>, settings: JobSettings) -> Self {
        Self {
            id: crate::unique_token(),
            model,
            sink,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle that stops the job before its next frame.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn run<S>(&self, source: &mut S) -> Result<JobResult, PipelineError>
    where
        S: VideoSource + ?Sized,
    {
        self.model.ensure_ready()?;
        let started = Instant::now();
        let fps = source.nominal_fps();
        let per_track_artifacts =
            self.settings.render && self.settings.retention == FrameRetention::Retain;
        // Best frames are only worth holding when they will be rendered.
        let mut scope = AggregationScope::new(if per_track_artifacts {
            FrameRetention::Retain
        } else {
            FrameRetention::Discard
        });
        let mut encoder: Option<Box<dyn FrameEncoder>> =
            if self.settings.render && !per_track_artifacts {
                Some(Box::new(SequenceEncoder::new(
                    Arc::clone(&self.sink),
                    "video",
                    fps,
                    self.settings.jpeg_quality,
                )))
            } else {
                None
            };

        let folded = self.fold_frames(source, fps, &mut scope, encoder.as_mut());
        self.model.end_track_session(scope.id());
        let stats = match folded {
            Ok(stats) => stats,
            Err(err) => {
                if let Some(encoder) = encoder {
                    encoder.discard();
                }
                match &err {
                    PipelineError::Cancelled => log::warn!("VideoJob {}: cancelled", self.id),
                    other => log::error!("VideoJob {}: aborted: {}", self.id, other),
                }
                return Err(err);
            }
        };

        let records = scope.finalize();
        let (order, artifacts) = if per_track_artifacts {
            let mut artifacts = Vec::with_capacity(records.len());
            for record in &records {
                let Some(frame) = record.source_frame.as_ref() else {
                    continue;
                };
                let image = render::annotate(frame, std::slice::from_ref(&record.best_detection));
                let reference = artifact::write_jpeg(
                    self.sink.as_ref(),
                    &format!("track_{}", record.track_id),
                    &image,
                    self.settings.jpeg_quality,
                )?;
                artifacts.push((record.track_id, reference));
            }
            (RecordOrder::TrackId, artifacts)
        } else {
            (RecordOrder::Confidence, Vec::new())
        };
        let artifact_reference: Option<ArtifactRef> = match encoder {
            Some(encoder) => Some(encoder.finish()?),
            None => None,
        };

        log::info!(
            "VideoJob {}: {} frames read, {} evaluated, {} skipped, {} tracks in {:?}",
            self.id,
            stats.frames_read,
            stats.frames_evaluated,
            stats.frames_skipped,
            records.len(),
            started.elapsed()
        );
        Ok(JobResult::from_tracks(
            records,
            order,
            &artifacts,
            artifact_reference,
        ))
    }

    fn fold_frames<S>(
        &self,
        source: &mut S,
        fps: f64,
        scope: &mut AggregationScope,
        mut encoder: Option<&mut Box<dyn FrameEncoder>>,
    ) -> Result<PassStats, PipelineError>
    where
        S: VideoSource + ?Sized,
    {
        let classes = self.model.classes()?;
        let sampler = self.settings.sampling.sampler_for(fps);
        let call = DetectorCall::Track(scope.id().clone());
        let mut calls = CallSlot::new();
        let mut stats = PassStats::default();
        log::info!(
            "VideoJob {}: started ({:.2} fps, evaluating every {} frames)",
            self.id,
            fps,
            sampler.skip()
        );

        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let index = stats.frames_read;
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame.with_index(index),
                Ok(None) => break,
                Err(err) if err.is_recoverable() => {
                    log::warn!("VideoJob {}: frame {} unreadable: {}", self.id, index, err);
                    stats.frames_read += 1;
                    stats.frames_skipped += 1;
                    if let Some(encoder) = encoder.as_mut() {
                        encoder.skip()?;
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };
            stats.frames_read += 1;

            if !sampler.should_evaluate(index) {
                if let Some(encoder) = encoder.as_mut() {
                    encoder.push(&frame.to_rgb_image())?;
                }
                continue;
            }

            let evaluated = detect_frame(
                &self.model,
                &mut calls,
                &frame,
                call.clone(),
                classes,
                &self.settings,
            );
            let detections = match evaluated {
                Ok(detections) => {
                    stats.frames_evaluated += 1;
                    detections
                }
                Err(err) if err.is_recoverable() => {
                    log::warn!("VideoJob {}: frame {} skipped: {}", self.id, index, err);
                    stats.frames_skipped += 1;
                    Vec::new()
                }
                Err(err) => return Err(err),
            };
            let summary = scope.update(&frame, &detections);
            log::debug!(
                "VideoJob {}: frame {} -> {} detections ({} new tracks, {} improved)",
                self.id,
                index,
                detections.len(),
                summary.created,
                summary.improved
            );
            if let Some(encoder) = encoder.as_mut() {
                encoder.push(&render::annotate(&frame, &detections))?;
            }
        }
        Ok(stats)
    }
}

fn detect_frame(
    model: &ModelHandle,
    calls: &mut CallSlot,
    frame: &Frame,
    call: DetectorCall,
    classes: &ClassTable,
    settings: &JobSettings,
) -> Result<Vec<Detection>, PipelineError> {
    let raw = model.invoke(calls, frame, call, settings.detector_timeout)?;
    Ok(normalize(raw, classes, settings.min_confidence))
}
