//! Face detection seam.
//!
//! Detection models live outside this crate. A detector only has to turn a
//! frame into candidate boxes; the session filters them by confidence and
//! area before recognition.

use crate::types::BoundingBox;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    Failed(String),
    #[error("invalid detections: {0}")]
    InvalidDetections(#[from] serde_json::Error),
}

pub trait FaceDetector {
    /// Detect faces in `frame`, returning boxes in frame pixel coordinates.
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Treats the whole frame as a single face. For inputs that are already
/// face crops.
pub struct WholeFrameDetector;

impl FaceDetector for WholeFrameDetector {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: frame.width() as f32,
            height: frame.height() as f32,
            confidence: 1.0,
        }])
    }
}

/// Replays boxes produced by an external detector.
#[derive(Debug, Clone, Default)]
pub struct StaticDetector {
    boxes: Vec<BoundingBox>,
}

impl StaticDetector {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }

    pub fn from_json(json: &str) -> Result<Self, DetectorError> {
        Ok(Self::new(parse_boxes(json)?))
    }

    pub fn set_boxes(&mut self, boxes: Vec<BoundingBox>) {
        self.boxes = boxes;
    }
}

impl FaceDetector for StaticDetector {
    fn detect(&mut self, _frame: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.boxes.clone())
    }
}

/// Parse a JSON array of `{x, y, width, height, confidence}` objects.
pub fn parse_boxes(json: &str) -> Result<Vec<BoundingBox>, DetectorError> {
    Ok(serde_json::from_str(json)?)
}
