//! Recognition session: the per-frame pipeline plus gallery administration.
//!
//! One session owns the detector, the gallery and the enrollment state.
//! Nothing in here is thread-safe; drive a session from a single thread.

use crate::detector::{DetectorError, FaceDetector};
use crate::enrollment::{EnrollError, EnrollmentController};
use crate::extractor::{self, ExtractError};
use crate::gallery::{Gallery, GalleryError};
use crate::matcher::{CosineMatcher, Matcher, DEFAULT_SIMILARITY_THRESHOLD};
use crate::mirror::DatasetMirror;
use crate::store::FaceStore;
use crate::types::{BoundingBox, MatchResult, Recognition};
use image::DynamicImage;
use std::path::PathBuf;
use thiserror::Error;

/// Default minimum detector confidence for a box to be considered.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("extract: {0}")]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Cosine similarity needed for a match (inclusive).
    pub similarity_threshold: f32,
    /// Detector confidence a box must exceed.
    pub confidence_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Result of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    /// Name as stored (trimmed).
    pub name: String,
    /// Mirror artifact, when one was written.
    pub mirror_path: Option<PathBuf>,
}

pub struct RecognitionSession<D, S: FaceStore, M = CosineMatcher> {
    detector: D,
    gallery: Gallery<S>,
    matcher: M,
    enrollment: EnrollmentController,
    mirror: Option<DatasetMirror>,
    config: SessionConfig,
}

impl<D: FaceDetector, S: FaceStore> RecognitionSession<D, S, CosineMatcher> {
    pub fn new(detector: D, gallery: Gallery<S>, config: SessionConfig) -> Self {
        Self::with_matcher(detector, gallery, CosineMatcher, config)
    }
}

impl<D: FaceDetector, S: FaceStore, M: Matcher> RecognitionSession<D, S, M> {
    pub fn with_matcher(detector: D, gallery: Gallery<S>, matcher: M, config: SessionConfig) -> Self {
        Self {
            detector,
            gallery,
            matcher,
            enrollment: EnrollmentController::new(),
            mirror: None,
            config,
        }
    }

    /// Also write each enrolled embedding to `mirror`.
    pub fn with_mirror(mut self, mirror: DatasetMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Detect, embed and match every face in `frame`.
    ///
    /// The last unmatched face of the frame becomes the pending enrollment
    /// candidate. A frame whose faces all matched returns enrollment to idle;
    /// a frame without usable faces leaves it alone.
    pub fn process_frame(&mut self, frame: &DynamicImage) -> Result<Vec<Recognition>, SessionError> {
        let boxes = self.detector.detect(frame)?;
        let threshold = self.config.similarity_threshold;

        let mut recognitions = Vec::new();
        let mut last_unknown: Option<(MatchResult, DynamicImage)> = None;
        let mut last_known: Option<(MatchResult, DynamicImage)> = None;

        for bbox in boxes.into_iter().filter(|b| self.accepts(b)) {
            let Some(face) = extractor::crop_face(frame, &bbox) else {
                continue;
            };
            let embedding = extractor::extract(&face)?;
            let result = self.matcher.compare(
                &embedding,
                self.gallery.names(),
                self.gallery.embeddings(),
                threshold,
            );
            tracing::debug!(x = bbox.x, y = bbox.y, ?result, "face classified");

            recognitions.push(Recognition {
                label: result.name().map(str::to_string),
                score: result.score(),
                result: result.clone(),
                bbox,
            });

            if result.is_match() {
                last_known = Some((result, face));
            } else {
                last_unknown = Some((result, face));
            }
        }

        if let Some((result, face)) = last_unknown.or(last_known) {
            self.enrollment.observe(&result, &face);
        }

        Ok(recognitions)
    }

    fn accepts(&self, bbox: &BoundingBox) -> bool {
        bbox.confidence > self.config.confidence_threshold && bbox.area() > 0.0
    }

    /// The face an `enroll` call would save, if any.
    pub fn current_pending_face(&self) -> Option<&DynamicImage> {
        self.enrollment.pending()
    }

    /// Drop the pending candidate without saving it.
    pub fn discard_pending(&mut self) {
        self.enrollment.reset();
    }

    /// Save the pending face under `name`.
    pub fn enroll(&mut self, name: &str) -> Result<EnrollOutcome, SessionError> {
        let embedding = self.enrollment.commit(name, &mut self.gallery)?;
        let name = name.trim().to_string();

        let mirror_path = self.mirror.as_ref().and_then(|mirror| {
            match mirror.write(&name, &embedding) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "dataset mirror write failed");
                    None
                }
            }
        });

        tracing::info!(name = %name, "face enrolled");
        Ok(EnrollOutcome { name, mirror_path })
    }

    /// Enrolled names in gallery order; a name appears once per record.
    pub fn list_identities(&self) -> &[String] {
        self.gallery.names()
    }

    /// Remove every record for `name`. Returns the number removed.
    pub fn delete_identity(&mut self, name: &str) -> Result<usize, SessionError> {
        let removed = self.gallery.remove_by_name(name)?;
        if removed == 0 {
            return Ok(0);
        }
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.remove(name) {
                tracing::warn!(name, error = %e, "dataset mirror cleanup failed");
            }
        }
        Ok(removed)
    }

    pub fn clear_all(&mut self) -> Result<(), SessionError> {
        self.gallery.clear()?;
        Ok(())
    }

    /// Resynchronize the gallery from the store.
    pub fn reload(&mut self) -> Result<(), SessionError> {
        self.gallery.rebuild_from_store()?;
        Ok(())
    }

    /// Clear the gallery, purge the dataset mirror and drop any pending face.
    pub fn format(&mut self) -> Result<(), SessionError> {
        self.gallery.clear()?;
        if let Some(mirror) = &self.mirror {
            match mirror.purge() {
                Ok(removed) => tracing::info!(removed, "dataset mirror purged"),
                Err(e) => tracing::warn!(error = %e, "dataset mirror purge failed"),
            }
        }
        self.enrollment.reset();
        Ok(())
    }

    pub fn gallery(&self) -> &Gallery<S> {
        &self.gallery
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{StaticDetector, WholeFrameDetector};
    use crate::store::SqliteStore;
    use image::{GrayImage, Luma};

    fn face() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(120, 140, |x, y| {
            Luma([((x * 3 + y * 5) % 200 + 30) as u8])
        }))
    }

    /// 200×100 frame: left half bright on top, right half bright on bottom.
    fn split_frame() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(200, 100, |x, y| {
            let bright = if x < 100 { y < 50 } else { y >= 50 };
            Luma([if bright { 255 } else { 0 }])
        }))
    }

    fn bbox(x: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y: 0.0, width: 100.0, height: 100.0, confidence }
    }

    fn gallery() -> Gallery<SqliteStore> {
        Gallery::load(SqliteStore::open_in_memory().unwrap()).unwrap()
    }

    fn whole_frame_session() -> RecognitionSession<WholeFrameDetector, SqliteStore> {
        RecognitionSession::new(WholeFrameDetector, gallery(), SessionConfig::default())
    }

    #[test]
    fn test_enroll_then_recognize() {
        let mut session = whole_frame_session();

        let first = session.process_frame(&face()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].result, MatchResult::NoGallery);
        assert!(first[0].label.is_none());
        assert!(session.current_pending_face().is_some());

        let outcome = session.enroll("Alice").unwrap();
        assert_eq!(outcome.name, "Alice");
        assert!(outcome.mirror_path.is_none());
        assert_eq!(session.list_identities(), ["Alice"]);
        assert!(session.current_pending_face().is_none());

        let second = session.process_frame(&face()).unwrap();
        assert_eq!(second[0].label.as_deref(), Some("Alice"));
        let score = second[0].score.unwrap();
        assert!((score - 1.0).abs() < 1e-4, "score = {score}");
        assert!(session.current_pending_face().is_none());
    }

    #[test]
    fn test_enroll_while_idle() {
        let mut session = whole_frame_session();
        assert!(matches!(
            session.enroll("Alice"),
            Err(SessionError::Enroll(EnrollError::NoPendingCandidate))
        ));
        assert!(session.list_identities().is_empty());
    }

    #[test]
    fn test_clear_all_empties_store() {
        let mut session = whole_frame_session();
        for name in ["a", "b", "c"] {
            // A black frame has zero norm and never matches.
            session.process_frame(&DynamicImage::new_luma8(1, 1)).unwrap();
            session.enroll(name).unwrap();
        }
        assert_eq!(session.list_identities().len(), 3);

        session.clear_all().unwrap();
        assert!(session.list_identities().is_empty());
        session.reload().unwrap();
        assert!(session.list_identities().is_empty());
        assert!(session.gallery().store().select_all().unwrap().is_empty());
    }

    #[test]
    fn test_low_confidence_and_empty_boxes_are_skipped() {
        let detector = StaticDetector::new(vec![
            bbox(0.0, 0.6),
            BoundingBox { x: 10.0, y: 10.0, width: 0.0, height: 30.0, confidence: 0.99 },
            bbox(100.0, 0.61),
        ]);
        let mut session = RecognitionSession::new(detector, gallery(), SessionConfig::default());

        let results = session.process_frame(&split_frame()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bbox.x, 100.0);
    }

    #[test]
    fn test_mixed_frame_buffers_unknown_face() {
        let mut session = RecognitionSession::new(
            StaticDetector::new(vec![bbox(0.0, 0.9)]),
            gallery(),
            SessionConfig::default(),
        );
        let frame = split_frame();
        session.process_frame(&frame).unwrap();
        session.enroll("top").unwrap();

        session
            .detector_mut()
            .set_boxes(vec![bbox(0.0, 0.9), bbox(100.0, 0.9)]);
        let results = session.process_frame(&frame).unwrap();

        assert_eq!(results[0].label.as_deref(), Some("top"));
        assert!(matches!(results[1].result, MatchResult::Unmatched { .. }));

        let pending = session.current_pending_face().unwrap().to_luma8();
        let expected = frame.crop_imm(100, 0, 100, 100).to_luma8();
        assert_eq!(pending, expected);
    }

    #[test]
    fn test_frame_without_faces_keeps_pending() {
        let mut session = RecognitionSession::new(
            StaticDetector::new(vec![bbox(0.0, 0.9)]),
            gallery(),
            SessionConfig::default(),
        );
        session.process_frame(&split_frame()).unwrap();
        session.detector_mut().set_boxes(Vec::new());
        assert!(session.process_frame(&split_frame()).unwrap().is_empty());
        assert!(session.current_pending_face().is_some());
    }

    #[test]
    fn test_enroll_writes_mirror_and_delete_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = whole_frame_session().with_mirror(DatasetMirror::new(dir.path()));

        session.process_frame(&face()).unwrap();
        let outcome = session.enroll("bob").unwrap();
        let path = outcome.mirror_path.unwrap();
        assert!(path.exists());

        assert_eq!(session.delete_identity("bob").unwrap(), 1);
        assert!(!path.exists());
        assert_eq!(session.delete_identity("bob").unwrap(), 0);
    }

    #[test]
    fn test_delete_unknown_name_keeps_mirror_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = whole_frame_session().with_mirror(DatasetMirror::new(dir.path()));

        session.process_frame(&face()).unwrap();
        let path = session.enroll("a/b").unwrap().mirror_path.unwrap();
        assert!(path.ends_with("a_b.npy"));

        // Shares the artifact name but has no records.
        assert_eq!(session.delete_identity("a_b").unwrap(), 0);
        assert!(path.exists());
        assert_eq!(session.list_identities(), ["a/b"]);
    }

    #[test]
    fn test_delete_with_padded_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = whole_frame_session().with_mirror(DatasetMirror::new(dir.path()));

        session.process_frame(&face()).unwrap();
        let path = session.enroll("Alice").unwrap().mirror_path.unwrap();

        assert_eq!(session.delete_identity("Alice ").unwrap(), 1);
        assert!(session.list_identities().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_mirror_failure_does_not_roll_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("dataset");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let mut session = whole_frame_session().with_mirror(DatasetMirror::new(&blocker));

        session.process_frame(&face()).unwrap();
        let outcome = session.enroll("carol").unwrap();
        assert!(outcome.mirror_path.is_none());
        assert_eq!(session.list_identities(), ["carol"]);
    }

    #[test]
    fn test_format_purges_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = whole_frame_session().with_mirror(DatasetMirror::new(dir.path()));
        session.process_frame(&face()).unwrap();
        session.enroll("dave").unwrap();
        session.process_frame(&DynamicImage::new_luma8(1, 1)).unwrap();

        session.format().unwrap();
        assert!(session.list_identities().is_empty());
        assert!(session.current_pending_face().is_none());
        assert!(!dir.path().join("dave.npy").exists());
    }
}
