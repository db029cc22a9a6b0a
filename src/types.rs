use crate::frame::Frame;
use image::RgbImage;
use serde_json::Value;
use std::fmt;

/// Pixel-space rectangle. Constructed boxes always satisfy `x_min <= x_max`
/// and `y_min <= y_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        BoundingBox {
            x_min: x0.min(x1),
            y_min: y0.min(y1),
            x_max: x0.max(x1),
            y_max: y0.max(y1),
        }
    }
}

/// One detection reported by the inference server. The label is an object
/// class for the detectors and the read text for OCR.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub confidence: f64,
    pub label: String,
    pub bbox: BoundingBox,
}

impl Prediction {
    /// Reads one element of a `predictions` array. Returns `None` when a
    /// field is missing or has the wrong type.
    pub fn from_json(value: &Value) -> Option<Prediction> {
        Some(Prediction {
            confidence: value["confidence"].as_f64()?,
            label: value["label"].as_str()?.to_string(),
            bbox: BoundingBox::new(
                coordinate(&value["x_min"])?,
                coordinate(&value["y_min"])?,
                coordinate(&value["x_max"])?,
                coordinate(&value["y_max"])?,
            ),
        })
    }

    pub fn with_bbox(self, bbox: BoundingBox) -> Self {
        Prediction { bbox, ..self }
    }
}

// Servers differ on integer vs float coordinates; negatives clamp to 0.
fn coordinate(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return Some(n.min(u64::from(u32::MAX)) as u32);
    }
    value.as_f64().map(|f| f.max(0.0).round() as u32)
}

/// Evidence kept for a plate reading: the frame it came from and the plate
/// region cut out of it.
#[derive(Clone)]
pub struct Snapshot {
    pub frame: Frame,
    pub plate: Option<RgbImage>,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("frame", &self.frame)
            .field(
                "plate",
                &self.plate.as_ref().map(|p| (p.width(), p.height())),
            )
            .finish()
    }
}

/// A validated plate reading from one sampled frame, in frame coordinates.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub text: String,
    pub bbox: BoundingBox,
    pub snapshot: Snapshot,
}

impl Candidate {
    pub fn new(prediction: Prediction, frame: Frame, plate: Option<RgbImage>) -> Self {
        Candidate {
            text: prediction.label,
            bbox: prediction.bbox,
            snapshot: Snapshot { frame, plate },
        }
    }
}

#[derive(Debug, Clone)]
pub struct OccurrenceEntry {
    pub text: String,
    pub count: u32,
    /// Taken from the first candidate with this text and never replaced.
    pub snapshot: Snapshot,
}

/// Outcome of processing one video.
#[derive(Debug)]
pub enum PipelineResult {
    Detected(OccurrenceEntry),
    NoDetection,
}

impl PipelineResult {
    /// The winning text, or the empty string when nothing was read.
    pub fn plate_text(&self) -> &str {
        match self {
            PipelineResult::Detected(entry) => &entry.text,
            PipelineResult::NoDetection => "",
        }
    }

    pub fn entry(&self) -> Option<&OccurrenceEntry> {
        match self {
            PipelineResult::Detected(entry) => Some(entry),
            PipelineResult::NoDetection => None,
        }
    }
}
