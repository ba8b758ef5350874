//! Local file frame source.
//!
//! `FileSource` reads a video from local storage:
//! - `stub://<name>`: synthetic clip, for tests and demos
//! - a directory: every `.jpg`/`.jpeg`/`.png` inside, in file-name order
//! - any other path: decoded with FFmpeg (feature: video-ffmpeg)
//!
//! Remote URLs are refused.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

#[cfg(feature = "video-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::VideoSource;
use crate::error::PipelineError;
use crate::frame::Frame;

/// Frame rate assumed for image directories and stub clips.
pub const DEFAULT_FPS: f64 = 30.0;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local path, image directory or `stub://` name.
    pub path: String,
    /// Override for the source's nominal frame rate.
    pub fps: Option<f64>,
    /// Length of a synthetic clip.
    pub synthetic_frames: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            fps: None,
            synthetic_frames: 30,
        }
    }
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    ImageDir(ImageDirSource),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticFileSource::new(config))
        } else if Path::new(&config.path).is_dir() {
            FileBackend::ImageDir(ImageDirSource::new(config)?)
        } else {
            #[cfg(feature = "video-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::new(config)?)
            }
            #[cfg(not(feature = "video-ffmpeg"))]
            {
                return Err(anyhow!(
                    "decoding video files requires the video-ffmpeg feature"
                ));
            }
        };
        Ok(Self { backend })
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            FileBackend::ImageDir(source) => source.stats(),
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

impl VideoSource for FileSource {
    fn nominal_fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.fps,
            FileBackend::ImageDir(source) => source.fps,
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.nominal_fps(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::ImageDir(source) => source.next_frame(),
            #[cfg(feature = "video-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_read: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

const STUB_WIDTH: u32 = 64;
const STUB_HEIGHT: u32 = 48;

struct SyntheticFileSource {
    config: FileConfig,
    fps: f64,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        log::info!("FileSource: opened {} (synthetic)", config.path);
        Self {
            fps: config.fps.unwrap_or(DEFAULT_FPS),
            config,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.frame_count >= self.config.synthetic_frames {
            return Ok(None);
        }
        let pixels = self.generate_synthetic_pixels();
        self.frame_count += 1;
        Frame::from_rgb(pixels, STUB_WIDTH, STUB_HEIGHT).map(Some)
    }

    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let pixel_count = (STUB_WIDTH * STUB_HEIGHT * 3) as usize;
        (0..pixel_count)
            .map(|i| ((i as u64 + self.frame_count) % 256) as u8)
            .collect()
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_read: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Image directory source
// ----------------------------------------------------------------------------

struct ImageDirSource {
    config: FileConfig,
    fps: f64,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    fn new(config: FileConfig) -> Result<Self> {
        let files = list_images(Path::new(&config.path))?;
        log::info!(
            "FileSource: opened {} ({} images)",
            config.path,
            files.len()
        );
        Ok(Self {
            fps: config.fps.unwrap_or(DEFAULT_FPS),
            config,
            files,
            next: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let image = image::open(path)
            .map_err(|e| PipelineError::Decode(format!("{}: {}", path.display(), e)))?;
        Ok(Some(Frame::from_image(image.to_rgb8())))
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_read: self.next as u64,
            path: self.config.path.clone(),
        }
    }
}

/// Image files in `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
