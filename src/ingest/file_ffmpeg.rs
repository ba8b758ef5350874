//! Local video file decoding using FFmpeg.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::file::{FileConfig, FileStats, DEFAULT_FPS};
use crate::error::PipelineError;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    frame_count: u64,
    flushed: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", config.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let probed_fps = if rate.denominator() != 0 {
            f64::from(rate.numerator()) / f64::from(rate.denominator())
        } else {
            0.0
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let fps = match config.fps {
            Some(fps) => fps,
            None if probed_fps.is_finite() && probed_fps > 0.0 => probed_fps,
            None => {
                log::warn!(
                    "FileSource: {} reports no frame rate, assuming {}",
                    config.path,
                    DEFAULT_FPS
                );
                DEFAULT_FPS
            }
        };
        log::info!("FileSource: opened {} (ffmpeg, {:.2} fps)", config.path, fps);

        Ok(Self {
            config,
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frame_count: 0,
            flushed: false,
        })
    }

    pub(crate) fn nominal_fps(&self) -> f64 {
        self.fps
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let mut decoded = ffmpeg::frame::Video::empty();

        // Drain frames the decoder already holds before feeding more packets.
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }

        while let Some((stream, packet)) = self.input.packets().next() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .map_err(|e| PipelineError::Decode(format!("send packet to decoder: {}", e)))?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        if !self.flushed {
            self.flushed = true;
            let _ = self.decoder.send_eof();
        }
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        Ok(None)
    }

    pub(crate) fn stats(&self) -> FileStats {
        FileStats {
            frames_read: self.frame_count,
            path: self.config.path.clone(),
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame, PipelineError> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .map_err(|e| PipelineError::Decode(format!("scale frame to RGB: {}", e)))?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), PipelineError> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .ok_or_else(|| PipelineError::Decode("ffmpeg frame is truncated".into()))?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| PipelineError::Decode("ffmpeg frame row is out of bounds".into()))?,
        );
    }

    Ok((pixels, width, height))
}
