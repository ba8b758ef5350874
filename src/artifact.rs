//! Artifact sinks.
//!
//! Captured images, per-track images, and annotated frame sequences are written
//! through an `ArtifactSink`. Every name embeds a fresh uniqueness token so
//! concurrent jobs never collide, and a sink refuses to overwrite an existing
//! artifact.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::render;

/// Opaque handle to a stored artifact (a path or URI).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ArtifactSink: Send + Sync {
    /// Store `bytes` under `name`. Fails if `name` already exists.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<ArtifactRef, PipelineError>;

    /// Delete an artifact this process wrote under `name`. Missing names are
    /// not an error.
    fn remove(&self, name: &str) -> Result<(), PipelineError>;
}

/// `{prefix}_{token}.{ext}` with a fresh token.
pub fn artifact_name(prefix: &str, ext: &str) -> String {
    format!("{}_{}.{}", prefix, crate::unique_token(), ext)
}

/// Encode `image` as JPEG and store it under a fresh `{prefix}_{token}.jpg`.
pub fn write_jpeg(
    sink: &dyn ArtifactSink,
    prefix: &str,
    image: &RgbImage,
    quality: u8,
) -> Result<ArtifactRef, PipelineError> {
    let bytes = render::encode_jpeg(image, quality)?;
    sink.write(&artifact_name(prefix, "jpg"), &bytes)
}

fn sanitize_name(name: &str) -> Result<&str, PipelineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Internal("artifact name cannot be empty".into()));
    }
    if trimmed.starts_with('.')
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
    {
        return Err(PipelineError::Internal(format!(
            "artifact name {:?} must be lowercase [a-z0-9_.-] only",
            trimmed
        )));
    }
    Ok(trimmed)
}

/// Writes artifacts as files under a root directory.
#[derive(Clone, Debug)]
pub struct FilesystemArtifactSink {
    root: PathBuf,
}

impl FilesystemArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            PipelineError::Internal(format!(
                "failed to create artifact root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactSink for FilesystemArtifactSink {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<ArtifactRef, PipelineError> {
        let name = sanitize_name(name)?;
        let path = self.root.join(name);
        if path.exists() {
            return Err(PipelineError::Internal(format!(
                "artifact {} already exists",
                path.display()
            )));
        }
        write_atomic(&path, bytes)?;
        log::debug!("artifact: wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(ArtifactRef::new(path.to_string_lossy()))
    }

    fn remove(&self, name: &str) -> Result<(), PipelineError> {
        let path = self.root.join(sanitize_name(name)?);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PipelineError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".part");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Keeps artifacts in memory; references are `mem://{name}`.
#[derive(Default)]
pub struct InMemoryArtifactSink {
    entries: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().map(|(n, _)| n.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        let entries = self.entries.lock().ok()?;
        entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactSink for InMemoryArtifactSink {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<ArtifactRef, PipelineError> {
        let name = sanitize_name(name)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PipelineError::Internal("artifact store lock poisoned".into()))?;
        if entries.iter().any(|(n, _)| n == name) {
            return Err(PipelineError::Internal(format!(
                "artifact {} already exists",
                name
            )));
        }
        entries.push((name.to_string(), bytes.to_vec()));
        Ok(ArtifactRef::new(format!("mem://{}", name)))
    }

    fn remove(&self, name: &str) -> Result<(), PipelineError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PipelineError::Internal("artifact store lock poisoned".into()))?;
        entries.retain(|(n, _)| n != name);
        Ok(())
    }
}

/// Receives annotated frames one at a time and produces a single artifact.
pub trait FrameEncoder {
    fn push(&mut self, image: &RgbImage) -> Result<(), PipelineError>;

    /// Mark the next source position as missing.
    fn skip(&mut self) -> Result<(), PipelineError>;

    fn finish(self: Box<Self>) -> Result<ArtifactRef, PipelineError>;

    /// Give up and delete whatever was already written.
    fn discard(self: Box<Self>);
}

#[derive(Serialize)]
struct SequenceManifest<'a> {
    fps: f64,
    frame_count: usize,
    /// One entry per source position; `null` where the source frame was
    /// unreadable.
    frames: &'a [Option<ArtifactRef>],
}

/// Frame-sequence encoder: one JPEG per pushed frame plus a JSON manifest
/// listing them in source order. The manifest is the returned artifact.
pub struct SequenceEncoder {
    sink: Arc<dyn ArtifactSink>,
    stem: String,
    fps: f64,
    quality: u8,
    frames: Vec<Option<ArtifactRef>>,
    written: Vec<String>,
}

impl SequenceEncoder {
    pub fn new(sink: Arc<dyn ArtifactSink>, prefix: &str, fps: f64, quality: u8) -> Self {
        Self {
            sink,
            stem: format!("{}_{}", prefix, crate::unique_token()),
            fps,
            quality,
            frames: Vec::new(),
            written: Vec::new(),
        }
    }
}

impl FrameEncoder for SequenceEncoder {
    fn push(&mut self, image: &RgbImage) -> Result<(), PipelineError> {
        let bytes = render::encode_jpeg(image, self.quality)?;
        let name = format!("{}_{:06}.jpg", self.stem, self.frames.len());
        let reference = self.sink.write(&name, &bytes)?;
        self.written.push(name);
        self.frames.push(Some(reference));
        Ok(())
    }

    fn skip(&mut self) -> Result<(), PipelineError> {
        self.frames.push(None);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<ArtifactRef, PipelineError> {
        let manifest = SequenceManifest {
            fps: self.fps,
            frame_count: self.frames.len(),
            frames: &self.frames,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| PipelineError::Internal(format!("manifest encode failed: {}", e)))?;
        self.sink.write(&format!("{}.json", self.stem), &json)
    }

    fn discard(self: Box<Self>) {
        for name in &self.written {
            if let Err(err) = self.sink.remove(name) {
                log::warn!("artifact: could not remove {}: {}", name, err);
            }
        }
        log::debug!("artifact: discarded {} frames of {}", self.written.len(), self.stem);
    }
}
