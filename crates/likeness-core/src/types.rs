use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (FACE_WIDTH × FACE_HEIGHT intensities in [0, 1]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// A zero-norm vector on either side yields 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Outcome of comparing one probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    /// The gallery holds no records; every face is unmatched.
    NoGallery,
    /// Best similarity reached the threshold.
    Matched { name: String, score: f32 },
    /// Gallery is non-empty but the best similarity fell short.
    Unmatched { best_score: f32 },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    /// Name of the matched identity, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchResult::Matched { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Best similarity seen, or `None` when there was nothing to compare against.
    pub fn score(&self) -> Option<f32> {
        match self {
            MatchResult::NoGallery => None,
            MatchResult::Matched { score, .. } => Some(*score),
            MatchResult::Unmatched { best_score } => Some(*best_score),
        }
    }
}

/// Per-face recognition output handed to overlay rendering.
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub bbox: BoundingBox,
    /// Matched identity name, `None` for an unknown face.
    pub label: Option<String>,
    pub score: Option<f32>,
    #[serde(rename = "match")]
    pub result: MatchResult,
}
