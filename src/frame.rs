//! Decoded frame buffers.
//!
//! - `Frame`: RGB24 pixels plus dimensions and the frame's position in its sequence.
//!
//! Pixel storage is reference counted so that a frame can be retained by a
//! `TrackRecord`, handed to a timed detector call and passed to the output
//! encoder without copying the buffer.

use std::sync::Arc;

use image::RgbImage;

use crate::error::PipelineError;

/// A decoded RGB24 frame. Cloning shares the pixel buffer.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Zero-based position in the source sequence (message order for live sessions).
    pub index: u64,
}

impl Frame {
    /// Wrap packed RGB24 pixels. The buffer length must equal `width * height * 3`.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self, PipelineError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| PipelineError::Decode("frame dimensions overflow".to_string()))?;
        if width == 0 || height == 0 {
            return Err(PipelineError::Decode(format!(
                "frame has empty dimensions {}x{}",
                width, height
            )));
        }
        if pixels.len() != expected {
            return Err(PipelineError::Decode(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            index: 0,
        })
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw().into(),
            width,
            height,
            index: 0,
        }
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Copy into an owned image for drawing or encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length is validated at construction, so from_raw cannot fail here.
        RgbImage::from_raw(self.width, self.height, self.pixels.to_vec())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("index", &self.index)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
