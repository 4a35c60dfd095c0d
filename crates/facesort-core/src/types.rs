use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// A zero vector is similar to nothing (0.0).
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

    /// Serialize as little-endian f32 bytes for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_bytes`](Self::to_bytes). Trailing bytes that do not
    /// form a whole f32 are ignored.
    pub fn from_bytes(bytes: &[u8], model_version: Option<String>) -> Self {
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self { values, model_version }
    }
}

/// One reference sample of a registered person, as seen by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFace {
    /// Sample id in the registry.
    pub id: String,
    /// Name of the person this sample belongs to.
    pub person: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best gallery entry [-1, 1].
    pub similarity: f32,
    /// Id of the best reference sample (only when matched).
    pub reference_id: Option<String>,
    /// Person of the best reference sample (only when matched).
    pub person: Option<String>,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            reference_id: None,
            person: None,
        }
    }
}

/// Strategy for comparing a probe embedding against the gallery of reference faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[ReferenceFace], threshold: f32) -> MatchResult;
}

/// Best-of-gallery cosine similarity matcher.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[ReferenceFace], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, reference) in gallery.iter().enumerate() {
            let sim = probe.similarity(&reference.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                reference_id: Some(gallery[idx].id.clone()),
                person: Some(gallery[idx].person.clone()),
            },
            Some(_) => MatchResult::no_match(best_sim),
            None => MatchResult::no_match(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn reference(id: &str, person: &str, values: &[f32]) -> ReferenceFace {
        ReferenceFace { id: id.into(), person: person.into(), embedding: emb(values) }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((emb(&[1.0, 0.0]).similarity(&emb(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_embedding_bytes() {
        let a = Embedding { values: vec![0.25, -1.5, 3.0], model_version: Some("w600k_r50".into()) };
        let bytes = a.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Embedding::from_bytes(&bytes, a.model_version.clone()), a);
    }

    #[test]
    fn test_matcher_picks_best_person() {
        let probe = emb(&[1.0, 0.1, 0.0]);
        let gallery = vec![
            reference("1", "alice", &[0.0, 1.0, 0.0]),
            reference("2", "bob", &[0.0, 0.0, 1.0]),
            reference("3", "carol", &[1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.reference_id.as_deref(), Some("3"));
        assert_eq!(result.person.as_deref(), Some("carol"));
        assert!(result.similarity > 0.99);
    }

    #[test]
    fn test_matcher_below_threshold() {
        let probe = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![reference("1", "alice", &[0.0, 1.0, 0.0])];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(!result.matched);
        assert!(result.person.is_none());
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_inclusive() {
        let probe = emb(&[1.0, 0.0]);
        let gallery = vec![reference("1", "alice", &[1.0, 0.0])];
        assert!(CosineMatcher.compare(&probe, &gallery, 1.0).matched);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0]), &[], 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_bounding_box_json() {
        let bbox = BoundingBox {
            x: 1.0, y: 2.0, width: 3.0, height: 4.0, confidence: 0.9, landmarks: None,
        };
        let json = serde_json::to_value(&bbox).unwrap();
        assert_eq!(json["width"], 3.0);
        assert!(json["landmarks"].is_null());
        assert_eq!(bbox.area(), 12.0);
    }
}
