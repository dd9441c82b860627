//! Enrollment of unknown faces.
//!
//! The controller remembers the most recent face that failed to match so a
//! user can name it later, independent of the per-frame recognition loop.

use crate::extractor::{self, ExtractError};
use crate::gallery::{self, Gallery, GalleryError};
use crate::store::FaceStore;
use crate::types::{Embedding, MatchResult};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no unknown face to save")]
    NoPendingCandidate,
    #[error("enter a name")]
    EmptyName,
    #[error("extract: {0}")]
    Extract(#[from] ExtractError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
}

/// Enrollment state.
#[derive(Debug, Clone, Default)]
pub enum EnrollmentState {
    /// Nothing to save.
    #[default]
    Idle,
    /// The most recently seen unmatched face.
    Pending(DynamicImage),
}

#[derive(Debug, Default)]
pub struct EnrollmentController {
    state: EnrollmentState,
}

impl EnrollmentController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &EnrollmentState {
        &self.state
    }

    /// Feed one recognition verdict for `face`.
    ///
    /// A matched face returns the controller to Idle; an unmatched face (or
    /// any face while the gallery is empty) replaces the pending candidate.
    pub fn observe(&mut self, result: &MatchResult, face: &DynamicImage) {
        match result {
            MatchResult::Matched { .. } => self.state = EnrollmentState::Idle,
            MatchResult::Unmatched { .. } | MatchResult::NoGallery => {
                self.state = EnrollmentState::Pending(face.clone());
            }
        }
    }

    pub fn pending(&self) -> Option<&DynamicImage> {
        match &self.state {
            EnrollmentState::Idle => None,
            EnrollmentState::Pending(face) => Some(face),
        }
    }

    pub fn reset(&mut self) {
        self.state = EnrollmentState::Idle;
    }

    /// Save the pending face under `name`.
    ///
    /// On success the controller returns to Idle and the committed embedding
    /// is returned. On any error the state is left unchanged.
    pub fn commit<S: FaceStore>(
        &mut self,
        name: &str,
        gallery: &mut Gallery<S>,
    ) -> Result<Embedding, EnrollError> {
        let EnrollmentState::Pending(face) = &self.state else {
            return Err(EnrollError::NoPendingCandidate);
        };
        let name = gallery::validate_name(name).map_err(|_| EnrollError::EmptyName)?;

        let embedding = extractor::extract(face)?;
        gallery.add(name, embedding.clone())?;

        self.state = EnrollmentState::Idle;
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use image::{GrayImage, Luma};

    fn face(shade: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, y| {
            Luma([shade.wrapping_add((x * y) as u8)])
        }))
    }

    fn gallery() -> Gallery<SqliteStore> {
        Gallery::load(SqliteStore::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_starts_idle() {
        let controller = EnrollmentController::new();
        assert!(controller.pending().is_none());
        assert!(matches!(controller.state(), EnrollmentState::Idle));
    }

    #[test]
    fn test_unmatched_face_becomes_pending() {
        let mut controller = EnrollmentController::new();
        controller.observe(&MatchResult::NoGallery, &face(10));
        assert_eq!(controller.pending().map(|f| f.to_luma8()), Some(face(10).to_luma8()));
    }

    #[test]
    fn test_latest_unmatched_face_overwrites() {
        let mut controller = EnrollmentController::new();
        controller.observe(&MatchResult::Unmatched { best_score: 0.2 }, &face(10));
        controller.observe(&MatchResult::Unmatched { best_score: 0.3 }, &face(90));
        assert_eq!(controller.pending().map(|f| f.to_luma8()), Some(face(90).to_luma8()));
    }

    #[test]
    fn test_matched_face_returns_to_idle() {
        let mut controller = EnrollmentController::new();
        controller.observe(&MatchResult::NoGallery, &face(10));
        controller.observe(&MatchResult::Matched { name: "a".into(), score: 0.95 }, &face(10));
        assert!(controller.pending().is_none());
    }

    #[test]
    fn test_commit_while_idle_is_rejected() {
        let mut controller = EnrollmentController::new();
        let mut gallery = gallery();
        assert!(matches!(
            controller.commit("alice", &mut gallery),
            Err(EnrollError::NoPendingCandidate)
        ));
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_commit_blank_name_keeps_pending() {
        let mut controller = EnrollmentController::new();
        let mut gallery = gallery();
        controller.observe(&MatchResult::NoGallery, &face(10));

        assert!(matches!(controller.commit(" \t", &mut gallery), Err(EnrollError::EmptyName)));
        assert!(controller.pending().is_some());
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_commit_adds_to_gallery_and_goes_idle() {
        let mut controller = EnrollmentController::new();
        let mut gallery = gallery();
        controller.observe(&MatchResult::NoGallery, &face(10));

        let embedding = controller.commit(" alice ", &mut gallery).unwrap();
        assert!(controller.pending().is_none());
        assert_eq!(gallery.names(), ["alice"]);
        assert_eq!(gallery.embeddings()[0], embedding);
        assert_eq!(embedding, extractor::extract(&face(10)).unwrap());
    }

    #[test]
    fn test_reset_clears_pending() {
        let mut controller = EnrollmentController::new();
        controller.observe(&MatchResult::NoGallery, &face(10));
        controller.reset();
        assert!(controller.pending().is_none());
    }
}
