//! Frame ingestion.
//!
//! Video jobs pull frames from a `VideoSource`; live sessions decode one
//! inbound message at a time through a `FrameDecoder`.
//!
//! Reference sources:
//! - `FrameSequence`: frames already in memory
//! - `FileSource`: an image directory, a synthetic `stub://` clip, or a video
//!   file (feature: video-ffmpeg)

pub mod decode;
pub mod file;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod file_ffmpeg;

use std::collections::VecDeque;

use crate::error::PipelineError;
use crate::frame::Frame;

pub use decode::{FrameDecoder, ImageDecoder};
pub use file::{FileConfig, FileSource};

/// Pull-based frame source for video jobs.
pub trait VideoSource {
    /// Frames per second the source was recorded at.
    fn nominal_fps(&self) -> f64;

    /// Next frame in order, or `None` at end of stream.
    ///
    /// A `Decode` error covers only the current frame; the caller may keep
    /// pulling. Any other error ends the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

/// In-memory video.
#[derive(Clone, Debug)]
pub struct FrameSequence {
    fps: f64,
    frames: VecDeque<Frame>,
}

impl FrameSequence {
    pub fn new(fps: f64, frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            fps,
            frames: frames.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl VideoSource for FrameSequence {
    fn nominal_fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        Ok(self.frames.pop_front())
    }
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn nominal_fps(&self) -> f64 {
        (**self).nominal_fps()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        (**self).next_frame()
    }
}
