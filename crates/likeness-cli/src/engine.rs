use crate::config::Config;
use image::DynamicImage;
use likeness_core::gallery::GalleryError;
use likeness_core::store::StoreError;
use likeness_core::{
    BoundingBox, DatasetMirror, EnrollOutcome, FaceDetector, Gallery, Recognition,
    RecognitionSession, SessionError, SqliteStore, StaticDetector, WholeFrameDetector,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub db_path: PathBuf,
    pub records: usize,
    pub identities: usize,
    pub similarity_threshold: f32,
    pub confidence_threshold: f32,
    pub pending_face: bool,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from the command surface to the engine thread.
enum EngineRequest {
    ProcessFrame {
        frame: DynamicImage,
        /// Externally detected boxes; `None` treats the frame as one face.
        boxes: Option<Vec<BoundingBox>>,
        reply: Reply<Vec<Recognition>>,
    },
    PendingFace {
        reply: Reply<Option<DynamicImage>>,
    },
    Enroll {
        name: String,
        reply: Reply<EnrollOutcome>,
    },
    ListIdentities {
        reply: Reply<Vec<String>>,
    },
    DeleteIdentity {
        name: String,
        reply: Reply<usize>,
    },
    ClearAll {
        reply: Reply<()>,
    },
    Reload {
        reply: Reply<()>,
    },
    Format {
        reply: Reply<()>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect, embed and match every face in `frame`.
    pub async fn process_frame(
        &self,
        frame: DynamicImage,
        boxes: Option<Vec<BoundingBox>>,
    ) -> Result<Vec<Recognition>, EngineError> {
        self.request(|reply| EngineRequest::ProcessFrame { frame, boxes, reply })
            .await
    }

    pub async fn pending_face(&self) -> Result<Option<DynamicImage>, EngineError> {
        self.request(|reply| EngineRequest::PendingFace { reply }).await
    }

    pub async fn enroll(&self, name: String) -> Result<EnrollOutcome, EngineError> {
        self.request(|reply| EngineRequest::Enroll { name, reply }).await
    }

    pub async fn list_identities(&self) -> Result<Vec<String>, EngineError> {
        self.request(|reply| EngineRequest::ListIdentities { reply }).await
    }

    pub async fn delete_identity(&self, name: String) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::DeleteIdentity { name, reply })
            .await
    }

    pub async fn clear_all(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ClearAll { reply }).await
    }

    pub async fn reload(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Reload { reply }).await
    }

    pub async fn format(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Format { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

type Session = RecognitionSession<StaticDetector, SqliteStore>;

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the store and loads the gallery synchronously (fail-fast), then
/// enters a request loop. The session never leaves that thread, so all
/// gallery access is serialized.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let store = SqliteStore::open(&config.db_path)?;
    let gallery = Gallery::load(store)?;
    tracing::info!(
        path = %config.db_path.display(),
        records = gallery.len(),
        "face store opened"
    );

    let mut session = RecognitionSession::new(
        StaticDetector::default(),
        gallery,
        config.session_config(),
    );
    if config.mirror_enabled {
        tracing::info!(dir = %config.dataset_dir.display(), "dataset mirror enabled");
        session = session.with_mirror(DatasetMirror::new(&config.dataset_dir));
    }

    let db_path = config.db_path.clone();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut session, &db_path, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle_request(session: &mut Session, db_path: &Path, req: EngineRequest) {
    // A dropped receiver only means the caller gave up waiting.
    match req {
        EngineRequest::ProcessFrame { frame, boxes, reply } => {
            let _ = reply.send(run_process_frame(session, &frame, boxes));
        }
        EngineRequest::PendingFace { reply } => {
            let _ = reply.send(Ok(session.current_pending_face().cloned()));
        }
        EngineRequest::Enroll { name, reply } => {
            let _ = reply.send(session.enroll(&name).map_err(Into::into));
        }
        EngineRequest::ListIdentities { reply } => {
            let _ = reply.send(Ok(session.list_identities().to_vec()));
        }
        EngineRequest::DeleteIdentity { name, reply } => {
            let _ = reply.send(session.delete_identity(&name).map_err(Into::into));
        }
        EngineRequest::ClearAll { reply } => {
            let _ = reply.send(session.clear_all().map_err(Into::into));
        }
        EngineRequest::Reload { reply } => {
            let _ = reply.send(session.reload().map_err(Into::into));
        }
        EngineRequest::Format { reply } => {
            let _ = reply.send(session.format().map_err(Into::into));
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(Ok(status(session, db_path)));
        }
    }
}

fn run_process_frame(
    session: &mut Session,
    frame: &DynamicImage,
    boxes: Option<Vec<BoundingBox>>,
) -> Result<Vec<Recognition>, EngineError> {
    let boxes = match boxes {
        Some(boxes) => boxes,
        None => WholeFrameDetector
            .detect(frame)
            .map_err(SessionError::from)?,
    };
    session.detector_mut().set_boxes(boxes);

    let recognitions = session.process_frame(frame)?;
    tracing::debug!(
        faces = recognitions.len(),
        known = recognitions.iter().filter(|r| r.label.is_some()).count(),
        "frame processed"
    );
    Ok(recognitions)
}

fn status(session: &Session, db_path: &Path) -> EngineStatus {
    let names = session.list_identities();
    let mut distinct: Vec<&String> = names.iter().collect();
    distinct.sort();
    distinct.dedup();

    EngineStatus {
        db_path: db_path.to_path_buf(),
        records: names.len(),
        identities: distinct.len(),
        similarity_threshold: session.config().similarity_threshold,
        confidence_threshold: session.config().confidence_threshold,
        pending_face: session.current_pending_face().is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            db_path: dir.join("faces.db"),
            dataset_dir: dir.join("dataset"),
            similarity_threshold: 0.8,
            confidence_threshold: 0.6,
            mirror_enabled: true,
        }
    }

    fn face() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(90, 110, |x, y| {
            Luma([((x * 7 + y * 2) % 180 + 40) as u8])
        }))
    }

    #[tokio::test]
    async fn test_enroll_round_trip_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&test_config(dir.path())).unwrap();

        let first = engine.process_frame(face(), None).await.unwrap();
        assert!(first[0].label.is_none());
        assert!(engine.pending_face().await.unwrap().is_some());

        let outcome = engine.enroll("Alice".into()).await.unwrap();
        assert!(outcome.mirror_path.unwrap().ends_with("dataset/Alice.npy"));

        let second = engine.process_frame(face(), None).await.unwrap();
        assert_eq!(second[0].label.as_deref(), Some("Alice"));
        assert_eq!(engine.list_identities().await.unwrap(), ["Alice"]);
    }

    #[tokio::test]
    async fn test_enroll_without_pending_face() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&test_config(dir.path())).unwrap();
        let err = engine.enroll("Bob".into()).await.unwrap_err();
        assert_eq!(err.to_string(), "no unknown face to save");
    }

    #[tokio::test]
    async fn test_gallery_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let engine = spawn_engine(&config).unwrap();
            engine.process_frame(face(), None).await.unwrap();
            engine.enroll("Carol".into()).await.unwrap();
        }

        let engine = spawn_engine(&config).unwrap();
        let status = engine.status().await.unwrap();
        assert_eq!(status.records, 1);
        assert_eq!(engine.list_identities().await.unwrap(), ["Carol"]);
    }

    #[tokio::test]
    async fn test_explicit_boxes_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&test_config(dir.path())).unwrap();
        let boxes = vec![
            BoundingBox { x: 0.0, y: 0.0, width: 40.0, height: 40.0, confidence: 0.9 },
            BoundingBox { x: 40.0, y: 40.0, width: 40.0, height: 40.0, confidence: 0.2 },
        ];
        let results = engine.process_frame(face(), Some(boxes)).await.unwrap();
        assert_eq!(results.len(), 1);

        engine.enroll("Dan".into()).await.unwrap();
        engine.process_frame(DynamicImage::new_luma8(4, 4), None).await.unwrap();
        engine.enroll("Dan".into()).await.unwrap();

        let status = engine.status().await.unwrap();
        assert_eq!(status.records, 2);
        assert_eq!(status.identities, 1);
        assert!(!status.pending_face);

        assert_eq!(engine.delete_identity("Dan".into()).await.unwrap(), 2);
        assert_eq!(engine.delete_identity("Dan".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_format_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&test_config(dir.path())).unwrap();
        engine.process_frame(face(), None).await.unwrap();
        engine.enroll("Eve".into()).await.unwrap();

        engine.format().await.unwrap();
        engine.reload().await.unwrap();
        assert!(engine.list_identities().await.unwrap().is_empty());
        assert!(!dir.path().join("dataset/Eve.npy").exists());

        engine.process_frame(face(), None).await.unwrap();
        engine.enroll("Eve".into()).await.unwrap();
        engine.clear_all().await.unwrap();
        assert!(engine.list_identities().await.unwrap().is_empty());
    }
}
