//! Canonical detection values shared by every component.

use serde::{Deserialize, Serialize};

/// Integer pixel box with `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    /// Build a box from two corners in any order.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Round float detector coordinates to the nearest pixel.
    pub fn from_xyxy(xyxy: [f32; 4]) -> Self {
        let [x1, y1, x2, y2] = xyxy.map(|v| v.round() as i32);
        Self::new(x1, y1, x2, y2)
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One object instance located in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_orders_corners() {
        let b = BoundingBox::new(50, 40, 10, 80);
        assert_eq!(<[i32; 4]>::from(b), [10, 40, 50, 80]);
        assert_eq!(b.width(), 40);
        assert_eq!(b.height(), 40);
    }

    #[test]
    fn box_rounds_float_coordinates() {
        let b = BoundingBox::from_xyxy([10.4, 20.6, 5.5, 30.49]);
        assert_eq!(<[i32; 4]>::from(b), [6, 21, 10, 30]);
    }

    #[test]
    fn detection_serializes_with_wire_names() {
        let det = Detection {
            class_id: 2,
            class_name: "beagle".into(),
            confidence: 0.5,
            bbox: BoundingBox::new(1, 2, 3, 4),
            track_id: None,
        };
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["class"], "beagle");
        assert_eq!(json["box"], serde_json::json!([1, 2, 3, 4]));
        assert!(json.get("track_id").is_none());
    }
}
