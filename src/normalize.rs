//! Detection normalizer.
//!
//! Turns raw detector rows into canonical `Detection` values, keeping the
//! detector's output order. Rows the frame can do without are dropped with a
//! warning; nothing here fails the frame.

use crate::detect::{ClassTable, RawDetection};
use crate::detection::{BoundingBox, Detection};

/// Normalize one frame of detector output.
///
/// - Unknown class ids are labelled with the numeric id.
/// - Non-finite confidences are dropped; the rest are clamped to `[0, 1]`.
/// - Rows under `min_confidence` are dropped.
pub fn normalize(
    raw: Vec<RawDetection>,
    classes: &ClassTable,
    min_confidence: f32,
) -> Vec<Detection> {
    let mut out = Vec::with_capacity(raw.len());
    for row in raw {
        if !row.confidence.is_finite() || row.xyxy.iter().any(|v| !v.is_finite()) {
            log::warn!(
                "normalize: dropping non-finite detection for class {}",
                row.class_id
            );
            continue;
        }
        let confidence = row.confidence.clamp(0.0, 1.0);
        if confidence < min_confidence {
            continue;
        }
        let class_name = match classes.resolve(row.class_id) {
            Ok(name) => name.to_string(),
            Err(err) => {
                log::warn!("normalize: {}; using numeric label", err);
                row.class_id.to_string()
            }
        };
        out.push(Detection {
            class_id: row.class_id,
            class_name,
            confidence,
            bbox: BoundingBox::from_xyxy(row.xyxy),
            track_id: row.track_id,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> ClassTable {
        ClassTable::from_names(["beagle", "pug"])
    }

    #[test]
    fn empty_output_is_empty_not_error() {
        assert!(normalize(Vec::new(), &classes(), 0.25).is_empty());
    }

    #[test]
    fn keeps_detector_order() {
        let raw = vec![
            RawDetection::new(0, 0.3, [0.0, 0.0, 1.0, 1.0]),
            RawDetection::new(1, 0.9, [0.0, 0.0, 1.0, 1.0]),
            RawDetection::new(0, 0.6, [0.0, 0.0, 1.0, 1.0]),
        ];
        let confidences: Vec<f32> = normalize(raw, &classes(), 0.0)
            .iter()
            .map(|d| d.confidence)
            .collect();
        assert_eq!(confidences, vec![0.3, 0.9, 0.6]);
    }

    #[test]
    fn unknown_class_falls_back_to_numeric_label() {
        let out = normalize(
            vec![RawDetection::new(42, 0.8, [0.0, 0.0, 4.0, 4.0])],
            &classes(),
            0.0,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_name, "42");
    }

    #[test]
    fn applies_confidence_floor_and_clamps() {
        let raw = vec![
            RawDetection::new(0, 0.1, [0.0, 0.0, 1.0, 1.0]),
            RawDetection::new(1, 1.4, [0.0, 0.0, 1.0, 1.0]),
            RawDetection::new(1, f32::NAN, [0.0, 0.0, 1.0, 1.0]),
        ];
        let out = normalize(raw, &classes(), 0.25);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 1.0);
        assert_eq!(out[0].class_name, "pug");
    }

    #[test]
    fn orders_box_corners_and_keeps_track_id() {
        let raw = vec![RawDetection::new(0, 0.5, [30.2, 40.0, 10.0, 5.0]).with_track(9)];
        let out = normalize(raw, &classes(), 0.0);
        assert_eq!(<[i32; 4]>::from(out[0].bbox), [10, 5, 30, 40]);
        assert_eq!(out[0].track_id, Some(9));
    }
}
