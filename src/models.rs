use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Side length of the canonical digit crop fed to the descriptor extractor
pub const CANONICAL_SIZE: u32 = 28;

/// Axis-aligned box in pixel coordinates of the source image.
///
/// Serialized as a flat `[x, y, width, height]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Self { x, y, width, height }
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One segmented digit: where it is, and its normalized 28x28 crop
#[derive(Debug, Clone)]
pub struct Segment {
    pub bbox: BoundingBox,
    pub crop: GrayImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitComponent {
    pub label: String,
    /// Percentage in [0, 100]
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// Outcome of a single `predict` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Labels concatenated left to right
    pub prediction: String,
    /// Mean digit confidence, rounded to two decimals
    pub accuracy: f64,
    /// Wall time of preprocessing through classification
    pub processing_time_ms: u64,
    pub digits: Vec<DigitComponent>,
}

/// Round to two decimal places, the precision every reported score uses
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
