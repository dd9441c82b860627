//! likeness-core — Face identity matching engine.
//!
//! Turns cropped faces into intensity embeddings, keeps a SQLite-backed
//! gallery of named references, matches live faces against it by cosine
//! similarity and enrolls unknown faces on request.

pub mod detector;
pub mod enrollment;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod mirror;
pub mod session;
pub mod store;
pub mod types;

pub use detector::{FaceDetector, StaticDetector, WholeFrameDetector};
pub use gallery::Gallery;
pub use matcher::{CosineMatcher, Matcher};
pub use mirror::DatasetMirror;
pub use session::{EnrollOutcome, RecognitionSession, SessionConfig, SessionError};
pub use store::{FaceStore, SqliteStore};
pub use types::{BoundingBox, Embedding, MatchResult, Recognition};
