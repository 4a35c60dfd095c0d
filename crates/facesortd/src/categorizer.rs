//! Sorting photos into per-person folders by the faces they contain.

use crate::placement::{self, Placement};
use chrono::{DateTime, Utc};
use facesort_core::{CosineMatcher, FaceAnalyzer, Frame, Matcher, ReferenceFace};
use facesort_registry::UNKNOWN_FOLDER;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A photo to categorize.
#[derive(Debug, Clone)]
pub struct PhotoInput {
    pub path: PathBuf,
    /// Name used for the copy (the upload's original name for form uploads).
    pub file_name: String,
}

impl PhotoInput {
    pub fn from_path(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, file_name }
    }
}

/// How photos are assigned to people.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Match every detected face against the registry.
    Automatic,
    /// Put every photo with at least one face under this person.
    Manual(String),
    /// Put every photo under the unknown folder without matching.
    Unsorted,
}

impl Mode {
    fn label(&self) -> String {
        match self {
            Mode::Automatic => "automatic".to_string(),
            Mode::Manual(person) => format!("manual:{person}"),
            Mode::Unsorted => format!("manual:{UNKNOWN_FOLDER}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    /// At least one registered person was found.
    Matched,
    /// Faces were found but none matched.
    Unmatched,
    NoFaces,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonMatch {
    pub person: String,
    /// Best similarity over the photo's faces; `None` in manual mode.
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoOutcome {
    pub file_name: String,
    pub source: PathBuf,
    pub status: PhotoStatus,
    pub faces_detected: usize,
    pub matches: Vec<PersonMatch>,
    pub placements: Vec<Placement>,
    pub error: Option<String>,
}

impl PhotoOutcome {
    fn failed(photo: &PhotoInput, faces_detected: usize, placements: Vec<Placement>, error: String) -> Self {
        Self {
            file_name: photo.file_name.clone(),
            source: photo.path.clone(),
            status: PhotoStatus::Failed,
            faces_detected,
            matches: Vec::new(),
            placements,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub photos: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub no_faces: usize,
    pub failed: usize,
}

impl Summary {
    fn count(outcomes: &[PhotoOutcome]) -> Self {
        let mut summary = Summary { photos: outcomes.len(), ..Summary::default() };
        for outcome in outcomes {
            match outcome.status {
                PhotoStatus::Matched => summary.matched += 1,
                PhotoStatus::Unmatched => summary.unmatched += 1,
                PhotoStatus::NoFaces => summary.no_faces += 1,
                PhotoStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizeReport {
    pub run_id: Uuid,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: Summary,
    pub outcomes: Vec<PhotoOutcome>,
}

/// Runs one categorization over a set of photos.
pub struct Categorizer<'a> {
    analyzer: &'a mut dyn FaceAnalyzer,
    output_dir: &'a Path,
    threshold: f32,
    max_faces: usize,
}

impl<'a> Categorizer<'a> {
    pub fn new(
        analyzer: &'a mut dyn FaceAnalyzer,
        output_dir: &'a Path,
        threshold: f32,
        max_faces: usize,
    ) -> Self {
        Self { analyzer, output_dir, threshold, max_faces }
    }

    /// Categorize every photo. A photo that cannot be processed is reported
    /// as failed and does not stop the run.
    pub fn run(&mut self, photos: &[PhotoInput], gallery: &[ReferenceFace], mode: &Mode) -> CategorizeReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(%run_id, photos = photos.len(), gallery = gallery.len(), mode = %mode.label(), "categorize: started");

        let outcomes: Vec<PhotoOutcome> = photos
            .iter()
            .map(|photo| self.categorize_one(photo, gallery, mode))
            .collect();

        let summary = Summary::count(&outcomes);
        tracing::info!(
            %run_id,
            matched = summary.matched,
            unmatched = summary.unmatched,
            no_faces = summary.no_faces,
            failed = summary.failed,
            "categorize: finished"
        );

        CategorizeReport {
            run_id,
            mode: mode.label(),
            started_at,
            finished_at: Utc::now(),
            summary,
            outcomes,
        }
    }

    fn categorize_one(&mut self, photo: &PhotoInput, gallery: &[ReferenceFace], mode: &Mode) -> PhotoOutcome {
        let frame = match Frame::load(&photo.path) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(photo = %photo.path.display(), error = %e, "categorize: unreadable photo");
                return PhotoOutcome::failed(photo, 0, Vec::new(), e.to_string());
            }
        };

        let mut faces = match self.analyzer.detect(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(photo = %photo.path.display(), error = %e, "categorize: detection failed");
                return PhotoOutcome::failed(photo, 0, Vec::new(), e.to_string());
            }
        };
        faces.truncate(self.max_faces);
        let faces_detected = faces.len();

        let matches = match mode {
            _ if faces.is_empty() => Vec::new(),
            Mode::Manual(person) => vec![PersonMatch { person: person.clone(), similarity: None }],
            Mode::Unsorted => Vec::new(),
            Mode::Automatic if gallery.is_empty() => Vec::new(),
            Mode::Automatic => {
                let mut matches: Vec<PersonMatch> = Vec::new();
                for face in &faces {
                    let embedding = match self.analyzer.embed(&frame, face) {
                        Ok(e) => e,
                        Err(e) => {
                            tracing::warn!(photo = %photo.path.display(), error = %e, "categorize: embedding failed");
                            return PhotoOutcome::failed(photo, faces_detected, Vec::new(), e.to_string());
                        }
                    };
                    let result = CosineMatcher.compare(&embedding, gallery, self.threshold);
                    tracing::debug!(
                        photo = %photo.file_name,
                        similarity = result.similarity,
                        person = ?result.person,
                        "categorize: face compared"
                    );
                    if let Some(person) = result.person {
                        merge_match(&mut matches, person, result.similarity);
                    }
                }
                matches.sort_by(|a, b| b.similarity.unwrap_or(0.0).total_cmp(&a.similarity.unwrap_or(0.0)));
                matches
            }
        };

        let status = match (faces_detected, matches.is_empty()) {
            (0, _) => PhotoStatus::NoFaces,
            (_, true) => PhotoStatus::Unmatched,
            (_, false) => PhotoStatus::Matched,
        };

        let folders: Vec<&str> = if matches.is_empty() {
            vec![UNKNOWN_FOLDER]
        } else {
            matches.iter().map(|m| m.person.as_str()).collect()
        };

        let mut placements = Vec::with_capacity(folders.len());
        for folder in folders {
            match placement::place(&photo.path, self.output_dir, folder, &photo.file_name) {
                Ok(placed) => placements.push(placed),
                Err(e) => {
                    tracing::warn!(photo = %photo.path.display(), folder, error = %e, "categorize: copy failed");
                    return PhotoOutcome::failed(photo, faces_detected, placements, e.to_string());
                }
            }
        }

        PhotoOutcome {
            file_name: photo.file_name.clone(),
            source: photo.path.clone(),
            status,
            faces_detected,
            matches,
            placements,
            error: None,
        }
    }
}

/// Record `person` once, keeping the best similarity seen.
fn merge_match(matches: &mut Vec<PersonMatch>, person: String, similarity: f32) {
    match matches.iter_mut().find(|m| m.person == person) {
        Some(existing) => {
            if existing.similarity.map_or(true, |s| similarity > s) {
                existing.similarity = Some(similarity);
            }
        }
        None => matches.push(PersonMatch { person, similarity: Some(similarity) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{reference, write_photo, write_split_photo, ColorAnalyzer, BLACK, BLUE, GREEN, RED};
    use std::fs;

    fn categorize(
        dir: &Path,
        photos: &[PhotoInput],
        gallery: &[ReferenceFace],
        mode: &Mode,
    ) -> CategorizeReport {
        let mut analyzer = ColorAnalyzer::default();
        let out = dir.join("categorized");
        Categorizer::new(&mut analyzer, &out, 0.4, 16).run(photos, gallery, mode)
    }

    #[test]
    fn test_matching_face_goes_to_person_folder() {
        let dir = tempfile::tempdir().unwrap();
        let photo = PhotoInput::from_path(write_photo(dir.path(), "beach.png", RED));
        let gallery = vec![reference("alice", RED), reference("bob", BLUE)];

        let report = categorize(dir.path(), &[photo], &gallery, &Mode::Automatic);

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PhotoStatus::Matched);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].person, "alice");
        assert!(dir.path().join("categorized/alice/beach.png").exists());
        assert!(!dir.path().join("categorized/bob").exists());
        assert!(!dir.path().join("categorized/unknown").exists());
    }

    #[test]
    fn test_unmatched_face_goes_to_unknown_only() {
        let dir = tempfile::tempdir().unwrap();
        let photo = PhotoInput::from_path(write_photo(dir.path(), "park.png", GREEN));
        let gallery = vec![reference("alice", RED)];

        let report = categorize(dir.path(), &[photo], &gallery, &Mode::Automatic);

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PhotoStatus::Unmatched);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.placements[0].folder, UNKNOWN_FOLDER);
        assert!(dir.path().join("categorized/unknown/park.png").exists());
        assert!(!dir.path().join("categorized/alice").exists());
    }

    #[test]
    fn test_empty_gallery_assigns_nobody() {
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![
            PhotoInput::from_path(write_photo(dir.path(), "a.png", RED)),
            PhotoInput::from_path(write_photo(dir.path(), "b.png", BLUE)),
        ];

        let report = categorize(dir.path(), &photos, &[], &Mode::Automatic);

        assert!(report.outcomes.iter().all(|o| o.matches.is_empty()));
        assert_eq!(report.summary, Summary { photos: 2, unmatched: 2, ..Summary::default() });
    }

    #[test]
    fn test_two_people_in_one_photo() {
        let dir = tempfile::tempdir().unwrap();
        let photo = PhotoInput::from_path(write_split_photo(dir.path(), "group.png", RED, BLUE));
        let gallery = vec![reference("alice", RED), reference("bob", BLUE)];

        let report = categorize(dir.path(), &[photo], &gallery, &Mode::Automatic);

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.faces_detected, 2);
        let mut people: Vec<&str> = outcome.matches.iter().map(|m| m.person.as_str()).collect();
        people.sort();
        assert_eq!(people, vec!["alice", "bob"]);
        assert!(dir.path().join("categorized/alice/group.png").exists());
        assert!(dir.path().join("categorized/bob/group.png").exists());
    }

    #[test]
    fn test_same_person_twice_is_one_match() {
        let dir = tempfile::tempdir().unwrap();
        // Two red halves → two faces, both alice.
        let photo = PhotoInput::from_path(write_photo(dir.path(), "twins.png", RED));
        let report = categorize(dir.path(), &[photo], &[reference("alice", RED)], &Mode::Automatic);

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.faces_detected, 2);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.placements.len(), 1);
    }

    #[test]
    fn test_no_faces() {
        let dir = tempfile::tempdir().unwrap();
        let photo = PhotoInput::from_path(write_photo(dir.path(), "night.png", BLACK));
        let report = categorize(dir.path(), &[photo], &[reference("alice", RED)], &Mode::Automatic);

        assert_eq!(report.outcomes[0].status, PhotoStatus::NoFaces);
        assert!(dir.path().join("categorized/unknown/night.png").exists());
    }

    #[test]
    fn test_manual_mode() {
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![
            PhotoInput::from_path(write_photo(dir.path(), "face.png", GREEN)),
            PhotoInput::from_path(write_photo(dir.path(), "dark.png", BLACK)),
        ];
        let mode = Mode::Manual("alice".into());

        let report = categorize(dir.path(), &photos, &[], &mode);

        assert_eq!(report.mode, "manual:alice");
        assert_eq!(report.outcomes[0].status, PhotoStatus::Matched);
        assert_eq!(report.outcomes[0].matches[0].similarity, None);
        assert_eq!(report.outcomes[1].status, PhotoStatus::NoFaces);
        assert!(dir.path().join("categorized/alice/face.png").exists());
        assert!(dir.path().join("categorized/unknown/dark.png").exists());
    }

    #[test]
    fn test_unsorted_mode_sends_everything_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![
            PhotoInput::from_path(write_photo(dir.path(), "face.png", RED)),
            PhotoInput::from_path(write_photo(dir.path(), "dark.png", BLACK)),
        ];

        let report = categorize(dir.path(), &photos, &[reference("alice", RED)], &Mode::Unsorted);

        assert_eq!(report.mode, "manual:unknown");
        assert!(report.outcomes.iter().all(|o| o.matches.is_empty()));
        assert_eq!(report.outcomes[0].status, PhotoStatus::Unmatched);
        assert_eq!(report.outcomes[1].status, PhotoStatus::NoFaces);
        assert!(dir.path().join("categorized/unknown/face.png").exists());
        assert!(dir.path().join("categorized/unknown/dark.png").exists());
        assert!(!dir.path().join("categorized/alice").exists());
    }

    #[test]
    fn test_unreadable_photo_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.jpg");
        fs::write(&broken, b"garbage").unwrap();
        let photos = vec![
            PhotoInput::from_path(broken),
            PhotoInput::from_path(dir.path().join("missing.png")),
            PhotoInput::from_path(write_photo(dir.path(), "ok.png", RED)),
        ];

        let report = categorize(dir.path(), &photos, &[reference("alice", RED)], &Mode::Automatic);

        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.summary.matched, 1);
        assert!(report.outcomes[0].error.is_some());
        assert_eq!(report.outcomes[2].status, PhotoStatus::Matched);
    }

    #[test]
    fn test_rerun_reuses_existing_copy() {
        let dir = tempfile::tempdir().unwrap();
        let photo = PhotoInput::from_path(write_photo(dir.path(), "a.png", RED));
        let gallery = vec![reference("alice", RED)];

        categorize(dir.path(), &[photo.clone()], &gallery, &Mode::Automatic);
        let report = categorize(dir.path(), &[photo], &gallery, &Mode::Automatic);

        assert!(report.outcomes[0].placements[0].reused);
        let copies = fs::read_dir(dir.path().join("categorized/alice")).unwrap().count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn test_max_faces_limits_comparisons() {
        let dir = tempfile::tempdir().unwrap();
        let photo = PhotoInput::from_path(write_split_photo(dir.path(), "pair.png", RED, BLUE));
        let gallery = vec![reference("alice", RED), reference("bob", BLUE)];
        let mut analyzer = ColorAnalyzer::default();
        let out = dir.path().join("categorized");

        let report = Categorizer::new(&mut analyzer, &out, 0.4, 1).run(&[photo], &gallery, &Mode::Automatic);

        assert_eq!(report.outcomes[0].faces_detected, 1);
        assert_eq!(report.outcomes[0].matches.len(), 1);
    }

    #[test]
    fn test_merge_match_keeps_best() {
        let mut matches = Vec::new();
        merge_match(&mut matches, "alice".into(), 0.5);
        merge_match(&mut matches, "alice".into(), 0.8);
        merge_match(&mut matches, "alice".into(), 0.6);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].similarity, Some(0.8));
    }
}
