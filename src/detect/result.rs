use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One detector output row, before normalization.
///
/// Coordinates are float pixels in `x1, y1, x2, y2` order as the detector emits
/// them; they may be unordered or fractional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub xyxy: [f32; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, xyxy: [f32; 4]) -> Self {
        Self {
            class_id,
            confidence,
            xyxy,
            track_id: None,
        }
    }

    pub fn with_track(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }
}

/// Class-id to name table owned by the detector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassTable {
    names: BTreeMap<u32, String>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from names indexed by position (`names[i]` is class `i`).
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .enumerate()
                .map(|(id, name)| (id as u32, name.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, class_id: u32, name: impl Into<String>) {
        self.names.insert(class_id, name.into());
    }

    pub fn resolve(&self, class_id: u32) -> Result<&str, PipelineError> {
        self.names
            .get(&class_id)
            .map(String::as_str)
            .ok_or(PipelineError::UnknownClass(class_id))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
