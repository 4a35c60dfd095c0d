use crate::categorizer::{CategorizeReport, Categorizer, Mode, PhotoInput};
use facesort_core::{BoundingBox, Embedding, FaceAnalyzer, Frame, ReferenceFace};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("photo error: {0}")]
    Photo(#[from] facesort_core::PhotoError),
    #[error("analyzer error: {0}")]
    Analyzer(#[from] facesort_core::AnalyzerError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Settings fixed for the lifetime of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Root of the per-person output folders.
    pub output_dir: PathBuf,
    pub similarity_threshold: f32,
    pub max_faces_per_photo: usize,
}

/// Faces found in one photo.
#[derive(Debug, Clone, Serialize)]
pub struct DetectResult {
    pub width: u32,
    pub height: u32,
    pub faces: Vec<BoundingBox>,
}

/// What enrollment made of one reference sample.
#[derive(Debug, Clone)]
pub enum SampleOutcome {
    /// Embedding of the most confident face.
    Face { embedding: Embedding, quality: f32 },
    NoFace,
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct AnalyzedSample {
    pub source: PathBuf,
    pub outcome: SampleOutcome,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Detect {
        photo: PathBuf,
        reply: oneshot::Sender<Result<DetectResult, EngineError>>,
    },
    Enroll {
        samples: Vec<PathBuf>,
        reply: oneshot::Sender<Vec<AnalyzedSample>>,
    },
    Categorize {
        photos: Vec<PhotoInput>,
        gallery: Vec<ReferenceFace>,
        mode: Mode,
        reply: oneshot::Sender<CategorizeReport>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect faces in a single photo.
    pub async fn detect(&self, photo: PathBuf) -> Result<DetectResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Detect { photo, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Analyze reference samples: one embedding per sample from its best face.
    pub async fn enroll(&self, samples: Vec<PathBuf>) -> Result<Vec<AnalyzedSample>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Enroll { samples, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Categorize photos against `gallery`.
    pub async fn categorize(
        &self,
        photos: Vec<PhotoInput>,
        gallery: Vec<ReferenceFace>,
        mode: Mode,
    ) -> Result<CategorizeReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Categorize { photos, gallery, mode, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread that owns `analyzer`.
///
/// Requests are served one at a time in arrival order.
pub fn spawn_engine(
    mut analyzer: Box<dyn FaceAnalyzer>,
    settings: EngineSettings,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facesort-engine".into())
        .spawn(move || {
            tracing::info!(output = %settings.output_dir.display(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { photo, reply } => {
                        let _ = reply.send(run_detect(analyzer.as_mut(), &photo));
                    }
                    EngineRequest::Enroll { samples, reply } => {
                        let _ = reply.send(run_enroll(analyzer.as_mut(), &samples));
                    }
                    EngineRequest::Categorize { photos, gallery, mode, reply } => {
                        let report = Categorizer::new(
                            analyzer.as_mut(),
                            &settings.output_dir,
                            settings.similarity_threshold,
                            settings.max_faces_per_photo,
                        )
                        .run(&photos, &gallery, &mode);
                        let _ = reply.send(report);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_detect(analyzer: &mut dyn FaceAnalyzer, photo: &std::path::Path) -> Result<DetectResult, EngineError> {
    let frame = Frame::load(photo)?;
    let faces = analyzer.detect(&frame)?;
    tracing::debug!(photo = %photo.display(), faces = faces.len(), "detect: done");
    Ok(DetectResult {
        width: frame.width,
        height: frame.height,
        faces,
    })
}

/// Embed the most confident face of each sample. Samples that cannot be
/// read or show no face are reported, not fatal.
fn run_enroll(analyzer: &mut dyn FaceAnalyzer, samples: &[PathBuf]) -> Vec<AnalyzedSample> {
    samples
        .iter()
        .map(|source| {
            let outcome = match enroll_one(analyzer, source) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(sample = %source.display(), error = %e, "enroll: sample rejected");
                    SampleOutcome::Unreadable(e.to_string())
                }
            };
            AnalyzedSample {
                source: source.clone(),
                outcome,
            }
        })
        .collect()
}

fn enroll_one(analyzer: &mut dyn FaceAnalyzer, source: &std::path::Path) -> Result<SampleOutcome, EngineError> {
    let frame = Frame::load(source)?;
    let faces = analyzer.detect(&frame)?;
    let Some(best) = faces
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    else {
        tracing::info!(sample = %source.display(), "enroll: no face in sample");
        return Ok(SampleOutcome::NoFace);
    };

    let embedding = analyzer.embed(&frame, best)?;
    tracing::info!(
        sample = %source.display(),
        confidence = best.confidence,
        faces = faces.len(),
        "enroll: best face selected"
    );
    Ok(SampleOutcome::Face {
        embedding,
        quality: best.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorizer::PhotoStatus;
    use crate::testutil::{reference, write_photo, write_split_photo, ColorAnalyzer, BLACK, GREEN, RED};

    fn engine(dir: &std::path::Path) -> EngineHandle {
        spawn_engine(
            Box::new(ColorAnalyzer),
            EngineSettings {
                output_dir: dir.join("categorized"),
                similarity_threshold: 0.4,
                max_faces_per_photo: 16,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_detect() {
        let dir = tempfile::tempdir().unwrap();
        let photo = write_split_photo(dir.path(), "half.png", RED, BLACK);

        let result = engine(dir.path()).detect(photo).await.unwrap();
        assert_eq!((result.width, result.height), (64, 48));
        assert_eq!(result.faces.len(), 1);
        assert_eq!(result.faces[0].x, 0.0);
    }

    #[tokio::test]
    async fn test_detect_missing_photo() {
        let dir = tempfile::tempdir().unwrap();
        let err = engine(dir.path())
            .detect(dir.path().join("nope.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Photo(_)));
    }

    #[tokio::test]
    async fn test_enroll_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let face = write_photo(dir.path(), "face.png", GREEN);
        let dark = write_photo(dir.path(), "dark.png", BLACK);
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"hello").unwrap();

        let analyzed = engine(dir.path()).enroll(vec![face, dark, text]).await.unwrap();

        assert_eq!(analyzed.len(), 3);
        match &analyzed[0].outcome {
            SampleOutcome::Face { quality, embedding } => {
                assert_eq!(*quality, 0.9);
                assert_eq!(embedding.values.len(), 3);
            }
            other => panic!("expected a face, got {other:?}"),
        }
        assert!(matches!(analyzed[1].outcome, SampleOutcome::NoFace));
        assert!(matches!(analyzed[2].outcome, SampleOutcome::Unreadable(_)));
    }

    #[tokio::test]
    async fn test_categorize_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let photo = PhotoInput::from_path(write_photo(dir.path(), "p.png", RED));

        let report = engine(dir.path())
            .categorize(vec![photo], vec![reference("alice", RED)], Mode::Automatic)
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].status, PhotoStatus::Matched);
        assert!(dir.path().join("categorized/alice/p.png").exists());
    }

    #[tokio::test]
    async fn test_handle_reports_running() {
        let dir = tempfile::tempdir().unwrap();
        let handle = engine(dir.path());
        assert!(handle.is_running());
    }
}
