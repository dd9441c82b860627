//! Feature extraction from cropped face images.
//!
//! A face crop is reduced to single-channel intensity, resized to a fixed
//! `FACE_WIDTH × FACE_HEIGHT` grid with bilinear interpolation, flattened
//! row-major and scaled into [0, 1]. Stored embeddings are compared against
//! live ones, so this path must stay bit-for-bit deterministic.

use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use thiserror::Error;

pub const FACE_WIDTH: u32 = 100;
pub const FACE_HEIGHT: u32 = 100;
pub const EMBEDDING_DIM: usize = (FACE_WIDTH * FACE_HEIGHT) as usize;

const PIXEL_MAX: f32 = 255.0;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("face image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// Convert a face crop into its fixed-length embedding.
pub fn extract(face: &DynamicImage) -> Result<Embedding, ExtractError> {
    let normalized = preprocess(face)?;
    let values = normalized
        .as_raw()
        .iter()
        .map(|&p| p as f32 / PIXEL_MAX)
        .collect();
    Ok(Embedding::new(values))
}

/// Grayscale + resize to the canonical face grid.
fn preprocess(face: &DynamicImage) -> Result<GrayImage, ExtractError> {
    let (width, height) = (face.width(), face.height());
    if width == 0 || height == 0 {
        return Err(ExtractError::EmptyImage { width, height });
    }

    let gray = face.to_luma8();
    Ok(imageops::resize(&gray, FACE_WIDTH, FACE_HEIGHT, FilterType::Triangle))
}

/// Cut a detected face out of a frame.
///
/// The box is clamped to the frame bounds. Returns `None` when nothing of the
/// box remains inside the frame.
pub fn crop_face(frame: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);

    let x0 = bbox.x.max(0.0).floor();
    let y0 = bbox.y.max(0.0).floor();
    let x1 = (bbox.x + bbox.width).min(fw).floor();
    let y1 = (bbox.y + bbox.height).min(fh).floor();

    if !(x1 > x0 && y1 > y0) {
        return None;
    }

    Some(frame.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}
