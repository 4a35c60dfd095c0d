//! The face-analysis boundary: detection plus embedding behind one trait.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::photo::Frame;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects faces in a photo and turns a detected face into an embedding.
///
/// Implementations are driven from a single engine thread, hence `&mut self`.
pub trait FaceAnalyzer: Send {
    /// Face regions in `frame`, most confident first.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Embedding for one face previously returned by [`detect`](Self::detect).
    fn embed(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, AnalyzerError>;
}

/// SCRFD + ArcFace on ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir` ([`DETECTOR_MODEL_FILE`], [`RECOGNIZER_MODEL_FILE`]).
    pub fn load(model_dir: &Path, options: DetectorOptions) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), options)?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(frame)?)
    }

    fn embed(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        Ok(self.recognizer.extract(frame, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_detector_first() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxAnalyzer::load(dir.path(), DetectorOptions::default()).err().unwrap();
        match err {
            AnalyzerError::Detector(DetectorError::ModelNotFound(path)) => {
                assert!(path.ends_with(DETECTOR_MODEL_FILE), "{path}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
