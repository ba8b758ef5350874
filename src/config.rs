use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregate::FrameRetention;
use crate::job::JobSettings;
use crate::sampling::{SamplingPolicy, DEFAULT_TARGET_RATE};
use crate::session::{CaptureSettings, StreamMode, DEFAULT_CAPTURE_THRESHOLD};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_DETECTOR_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_ARTIFACT_ROOT: &str = "artifacts";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    detector: Option<DetectorConfigFile>,
    sampling: Option<SamplingConfigFile>,
    capture: Option<CaptureConfigFile>,
    tracks: Option<TracksConfigFile>,
    artifacts: Option<ArtifactsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    min_confidence: Option<f32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingConfigFile {
    target_rate: Option<f64>,
    frame_skip: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    threshold: Option<f32>,
    mode: Option<StreamMode>,
}

#[derive(Debug, Deserialize, Default)]
struct TracksConfigFile {
    retain_source_frames: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ArtifactsConfigFile {
    root: Option<PathBuf>,
    render: Option<bool>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_confidence: f32,
    /// `None` disables the per-call detector timeout.
    pub detector_timeout: Option<Duration>,
    pub sampling: SamplingPolicy,
    pub capture_threshold: f32,
    pub stream_mode: StreamMode,
    pub retain_source_frames: bool,
    pub artifacts: ArtifactSettings,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub root: PathBuf,
    pub render: bool,
    pub jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            detector_timeout: Some(DEFAULT_DETECTOR_TIMEOUT),
            sampling: SamplingPolicy::default(),
            capture_threshold: DEFAULT_CAPTURE_THRESHOLD,
            stream_mode: StreamMode::Track,
            retain_source_frames: false,
            artifacts: ArtifactSettings {
                root: PathBuf::from(DEFAULT_ARTIFACT_ROOT),
                render: true,
                jpeg_quality: DEFAULT_JPEG_QUALITY,
            },
        }
    }
}

impl EngineConfig {
    /// Defaults, then the file named by `BESTSHOT_CONFIG`, then `BESTSHOT_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BESTSHOT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let defaults = Self::default();
        let detector = file.detector.unwrap_or_default();
        let sampling = file.sampling.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let tracks = file.tracks.unwrap_or_default();
        let artifacts = file.artifacts.unwrap_or_default();
        Self {
            min_confidence: detector.min_confidence.unwrap_or(defaults.min_confidence),
            detector_timeout: match detector.timeout_ms {
                Some(ms) => timeout_from_millis(ms),
                None => defaults.detector_timeout,
            },
            sampling: SamplingPolicy {
                target_rate: sampling.target_rate.unwrap_or(DEFAULT_TARGET_RATE),
                frame_skip: sampling.frame_skip,
            },
            capture_threshold: capture.threshold.unwrap_or(defaults.capture_threshold),
            stream_mode: capture.mode.unwrap_or(defaults.stream_mode),
            retain_source_frames: tracks
                .retain_source_frames
                .unwrap_or(defaults.retain_source_frames),
            artifacts: ArtifactSettings {
                root: artifacts.root.unwrap_or(defaults.artifacts.root),
                render: artifacts.render.unwrap_or(defaults.artifacts.render),
                jpeg_quality: artifacts
                    .jpeg_quality
                    .unwrap_or(defaults.artifacts.jpeg_quality),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value("BESTSHOT_MIN_CONFIDENCE") {
            self.min_confidence = value
                .parse()
                .map_err(|_| anyhow!("BESTSHOT_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(value) = env_value("BESTSHOT_DETECTOR_TIMEOUT_MS") {
            let ms: u64 = value.parse().map_err(|_| {
                anyhow!("BESTSHOT_DETECTOR_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.detector_timeout = timeout_from_millis(ms);
        }
        if let Some(value) = env_value("BESTSHOT_TARGET_RATE") {
            self.sampling.target_rate = value
                .parse()
                .map_err(|_| anyhow!("BESTSHOT_TARGET_RATE must be a number"))?;
        }
        if let Some(value) = env_value("BESTSHOT_FRAME_SKIP") {
            let skip: u32 = value
                .parse()
                .map_err(|_| anyhow!("BESTSHOT_FRAME_SKIP must be a positive integer"))?;
            self.sampling.frame_skip = Some(skip);
        }
        if let Some(value) = env_value("BESTSHOT_CAPTURE_THRESHOLD") {
            self.capture_threshold = value
                .parse()
                .map_err(|_| anyhow!("BESTSHOT_CAPTURE_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_value("BESTSHOT_STREAM_MODE") {
            self.stream_mode = value
                .parse()
                .map_err(|e| anyhow!("BESTSHOT_STREAM_MODE: {}", e))?;
        }
        if let Some(value) = env_value("BESTSHOT_RETAIN_SOURCE_FRAMES") {
            self.retain_source_frames = parse_bool(&value)
                .ok_or_else(|| anyhow!("BESTSHOT_RETAIN_SOURCE_FRAMES must be true or false"))?;
        }
        if let Some(value) = env_value("BESTSHOT_ARTIFACT_ROOT") {
            self.artifacts.root = PathBuf::from(value);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        check_unit("detector.min_confidence", self.min_confidence)?;
        check_unit("capture.threshold", self.capture_threshold)?;
        let rate = self.sampling.target_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(anyhow!("sampling.target_rate must be greater than zero"));
        }
        if self.sampling.frame_skip == Some(0) {
            return Err(anyhow!("sampling.frame_skip must be at least 1"));
        }
        if !(1..=100).contains(&self.artifacts.jpeg_quality) {
            return Err(anyhow!("artifacts.jpeg_quality must be within 1..=100"));
        }
        if self.artifacts.root.as_os_str().is_empty() {
            return Err(anyhow!("artifacts.root cannot be empty"));
        }
        Ok(())
    }

    pub fn retention(&self) -> FrameRetention {
        if self.retain_source_frames {
            FrameRetention::Retain
        } else {
            FrameRetention::Discard
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            min_confidence: self.min_confidence,
            detector_timeout: self.detector_timeout,
            sampling: self.sampling,
            retention: self.retention(),
            render: self.artifacts.render,
            jpeg_quality: self.artifacts.jpeg_quality,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            threshold: self.capture_threshold,
            mode: self.stream_mode,
            min_confidence: self.min_confidence,
            detector_timeout: self.detector_timeout,
            render: self.artifacts.render,
            jpeg_quality: self.artifacts.jpeg_quality,
        }
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn timeout_from_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn check_unit(key: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", key, value));
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
