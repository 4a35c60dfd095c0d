//! facesort-core — Face detection, recognition and matching for photo sorting.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod photo;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use detector::{DetectorOptions, FaceDetector};
pub use photo::{is_supported_photo, Frame, PhotoError};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, CosineMatcher, Embedding, MatchResult, Matcher, ReferenceFace};

/// Default ONNX model directory: `$XDG_DATA_HOME/facesort/models`
/// (falls back to `~/.local/share`).
pub fn default_model_dir() -> PathBuf {
    data_home().join("facesort").join("models")
}

/// `$XDG_DATA_HOME`, or `$HOME/.local/share`, or `/tmp` when neither is set.
pub fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
}
