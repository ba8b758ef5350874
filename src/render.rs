//! Annotation rendering for capture and track artifacts.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::Detection;
use crate::error::PipelineError;
use crate::frame::Frame;

const BOX_THICKNESS: i32 = 3;

/// Copy `frame` and draw every detection box on it.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> RgbImage {
    let mut image = frame.to_rgb_image();
    for det in detections {
        draw_detection(&mut image, det);
    }
    image
}

pub fn draw_detection(image: &mut RgbImage, det: &Detection) {
    let color = Rgb(class_color(det.class_id));
    let b = det.bbox;
    for inset in 0..BOX_THICKNESS {
        let w = b.width() as i32 - 2 * inset;
        let h = b.height() as i32 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(b.x1() + inset, b.y1() + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Encode as JPEG at the given quality (1..=100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| PipelineError::Internal(format!("jpeg encode failed: {}", e)))?;
    Ok(buf)
}

/// Distinct, stable color per class id (golden-angle hue walk).
fn class_color(class_id: u32) -> [u8; 3] {
    let hue = (class_id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.8, 0.95)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn det(class_id: u32, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            class_name: "beagle".into(),
            confidence: 0.9,
            bbox,
            track_id: None,
        }
    }

    #[test]
    fn annotate_draws_box_edges_only() {
        let frame = Frame::from_rgb(vec![0u8; 20 * 20 * 3], 20, 20).unwrap();
        let image = annotate(&frame, &[det(0, BoundingBox::new(2, 2, 12, 12))]);
        assert_ne!(image.get_pixel(2, 2).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(7, 7).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(18, 18).0, [0, 0, 0]);
    }

    #[test]
    fn degenerate_and_offscreen_boxes_do_not_panic() {
        let frame = Frame::from_rgb(vec![0u8; 4 * 4 * 3], 4, 4).unwrap();
        let _ = annotate(
            &frame,
            &[
                det(1, BoundingBox::new(1, 1, 1, 1)),
                det(2, BoundingBox::new(-10, -10, 50, 50)),
            ],
        );
    }

    #[test]
    fn jpeg_output_has_soi_marker() {
        let bytes = encode_jpeg(&RgbImage::new(8, 8), 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn class_colors_differ() {
        assert_ne!(class_color(0), class_color(1));
    }
}
