//! Live message decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::PipelineError;
use crate::frame::Frame;

/// Turns one inbound live-session payload into a frame.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Frame, PipelineError>;
}

/// Decodes encoded image bytes (JPEG or PNG), either raw or wrapped in a
/// `data:image/...;base64,` text payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    fn unwrap_data_url(payload: &[u8]) -> Result<Option<Vec<u8>>, PipelineError> {
        let Some(rest) = payload.strip_prefix(b"data:") else {
            return Ok(None);
        };
        let marker = b";base64,";
        let start = rest
            .windows(marker.len())
            .position(|w| w == marker)
            .ok_or_else(|| PipelineError::Decode("data url is not base64 encoded".into()))?;
        let body = &rest[start + marker.len()..];
        let body: Vec<u8> = body
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        STANDARD
            .decode(body)
            .map(Some)
            .map_err(|e| PipelineError::Decode(format!("invalid base64 payload: {}", e)))
    }
}

impl FrameDecoder for ImageDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Frame, PipelineError> {
        if payload.is_empty() {
            return Err(PipelineError::Decode("empty payload".into()));
        }
        let decoded = Self::unwrap_data_url(payload)?;
        let bytes = decoded.as_deref().unwrap_or(payload);
        let image = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        Ok(Frame::from_image(image.to_rgb8()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        RgbImage::new(3, 2)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_raw_image_bytes() {
        let frame = ImageDecoder.decode(&png_bytes()).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
    }

    #[test]
    fn decodes_data_url() {
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes()));
        let frame = ImageDecoder.decode(payload.as_bytes()).unwrap();
        assert_eq!(frame.width, 3);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        for payload in [
            &b"not an image"[..],
            b"",
            b"data:image/png,abc",
            b"data:image/png;base64,@@@",
        ] {
            let err = ImageDecoder.decode(payload).unwrap_err();
            assert!(matches!(err, PipelineError::Decode(_)), "{:?}", err);
        }
    }
}
