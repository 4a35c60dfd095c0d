//! The service behind every route: registration, categorization, listings.

use crate::categorizer::{CategorizeReport, Mode, PhotoInput};
use crate::config::Config;
use crate::engine::{DetectResult, EngineError, EngineHandle, SampleOutcome};
use facesort_core::is_supported_photo;
use facesort_registry::{NewSample, Person, Registry, RegistryError, UNKNOWN_FOLDER};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const RECENT_RUNS: usize = 20;

#[derive(Error, Debug)]
pub enum OrganizerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no face detected in any sample")]
    NoFaceInSamples { skipped: Vec<SkippedSample> },
    #[error("person not found: {0}")]
    PersonNotFound(String),
    #[error("no photos supplied")]
    NoPhotos,
    #[error("not found: {0}")]
    FileNotFound(String),
    #[error("registry lock poisoned")]
    Poisoned,
    #[error("background task failed: {0}")]
    Task(String),
}

/// A sample that was not used for registration.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSample {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub person: Person,
    pub added: usize,
    pub skipped: Vec<SkippedSample>,
}

/// An output folder and the photos in it.
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub name: String,
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: &'static str,
    pub engine_running: bool,
    pub persons: usize,
    pub similarity_threshold: f32,
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
}

struct Inner {
    engine: EngineHandle,
    registry: Arc<Mutex<Registry>>,
    categorized_dir: PathBuf,
    similarity_threshold: f32,
    data_dir: PathBuf,
    model_dir: PathBuf,
    recent: Mutex<VecDeque<CategorizeReport>>,
}

/// Clone-safe service handle shared by all routes.
#[derive(Clone)]
pub struct Organizer {
    inner: Arc<Inner>,
}

impl Organizer {
    pub fn new(engine: EngineHandle, registry: Registry, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                registry: Arc::new(Mutex::new(registry)),
                categorized_dir: config.categorized_dir(),
                similarity_threshold: config.similarity_threshold,
                data_dir: config.data_dir.clone(),
                model_dir: config.model_dir.clone(),
                recent: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Register `name` with reference sample images (or add samples to them).
    ///
    /// Samples without a detectable face are skipped; if none is usable the
    /// registration fails and nothing is stored.
    pub async fn register(&self, name: &str, samples: Vec<PathBuf>) -> Result<Registration, OrganizerError> {
        let name = facesort_registry::validate_name(name)?;
        if samples.is_empty() {
            return Err(RegistryError::NoSamples.into());
        }

        let analyzed = self.inner.engine.enroll(samples).await?;

        let mut accepted = Vec::new();
        let mut skipped = Vec::new();
        for sample in analyzed {
            let file_name = display_name(&sample.source);
            match sample.outcome {
                SampleOutcome::Face { embedding, quality } => accepted.push(NewSample {
                    source: sample.source,
                    embedding,
                    quality,
                }),
                SampleOutcome::NoFace => skipped.push(SkippedSample {
                    file_name,
                    reason: "no face detected".into(),
                }),
                SampleOutcome::Unreadable(reason) => skipped.push(SkippedSample { file_name, reason }),
            }
        }

        if accepted.is_empty() {
            return Err(OrganizerError::NoFaceInSamples { skipped });
        }

        let added = accepted.len();
        let person = self
            .with_registry(move |registry| registry.register(&name, &accepted))
            .await?;
        tracing::info!(person = %person.name, added, skipped = skipped.len(), "registered");

        Ok(Registration { person, added, skipped })
    }

    /// Sort photos into per-person folders.
    ///
    /// With `person`, every photo showing a face goes to that person instead
    /// of being matched against the registry. Naming the unknown folder sends
    /// every photo there.
    pub async fn categorize(
        &self,
        photos: Vec<PhotoInput>,
        person: Option<&str>,
    ) -> Result<CategorizeReport, OrganizerError> {
        if photos.is_empty() {
            return Err(OrganizerError::NoPhotos);
        }

        let (mode, gallery) = match person.map(str::trim).filter(|p| !p.is_empty()) {
            Some(wanted) if facesort_registry::name_key(wanted) == UNKNOWN_FOLDER => (Mode::Unsorted, Vec::new()),
            Some(wanted) => {
                let wanted = wanted.to_string();
                let found = self
                    .with_registry(move |registry| registry.person(&wanted))
                    .await?;
                match found {
                    Some(p) => (Mode::Manual(p.name), Vec::new()),
                    None => return Err(OrganizerError::PersonNotFound(person.unwrap_or_default().to_string())),
                }
            }
            None => {
                let gallery = self.with_registry(|registry| registry.gallery()).await?;
                (Mode::Automatic, gallery)
            }
        };

        let report = self.inner.engine.categorize(photos, gallery, mode).await?;

        let mut recent = self.inner.recent.lock().map_err(|_| OrganizerError::Poisoned)?;
        if recent.len() == RECENT_RUNS {
            recent.pop_back();
        }
        recent.push_front(report.clone());

        Ok(report)
    }

    /// Face regions in one photo.
    pub async fn detect(&self, photo: PathBuf) -> Result<DetectResult, OrganizerError> {
        Ok(self.inner.engine.detect(photo).await?)
    }

    pub async fn persons(&self) -> Result<Vec<Person>, OrganizerError> {
        self.with_registry(|registry| registry.persons()).await
    }

    /// Remove a person and their reference samples. Photos already sorted
    /// into their folder are left in place.
    pub async fn remove(&self, name: &str) -> Result<(), OrganizerError> {
        let owned = name.to_string();
        let removed = self
            .with_registry(move |registry| registry.remove(&owned))
            .await?;
        if removed {
            Ok(())
        } else {
            Err(OrganizerError::PersonNotFound(name.to_string()))
        }
    }

    /// Output folders and their photos, sorted by name.
    pub async fn collections(&self) -> Result<Vec<Collection>, OrganizerError> {
        let root = self.inner.categorized_dir.clone();
        tokio::task::spawn_blocking(move || scan_collections(&root))
            .await
            .map_err(|e| OrganizerError::Task(e.to_string()))?
            .map_err(|e| OrganizerError::Task(format!("scanning collections: {e}")))
    }

    /// Path of a sorted photo, if `folder/file` names one.
    pub fn collection_file(&self, folder: &str, file: &str) -> Result<PathBuf, OrganizerError> {
        let not_found = || OrganizerError::FileNotFound(format!("{folder}/{file}"));
        if !is_plain_component(folder) || !is_plain_component(file) {
            return Err(not_found());
        }
        let path = self.inner.categorized_dir.join(folder).join(file);
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        }
    }

    pub async fn status(&self) -> Result<Status, OrganizerError> {
        let persons = self.with_registry(|registry| registry.count()).await?;
        Ok(Status {
            version: env!("CARGO_PKG_VERSION"),
            engine_running: self.inner.engine.is_running(),
            persons,
            similarity_threshold: self.inner.similarity_threshold,
            data_dir: self.inner.data_dir.clone(),
            model_dir: self.inner.model_dir.clone(),
        })
    }

    /// Reports of the latest runs, newest first.
    pub fn recent_runs(&self) -> Result<Vec<CategorizeReport>, OrganizerError> {
        let recent = self.inner.recent.lock().map_err(|_| OrganizerError::Poisoned)?;
        Ok(recent.iter().cloned().collect())
    }

    /// Run `f` against the registry on the blocking pool.
    async fn with_registry<T, F>(&self, f: F) -> Result<T, OrganizerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Registry) -> Result<T, RegistryError> + Send + 'static,
    {
        let registry = Arc::clone(&self.inner.registry);
        tokio::task::spawn_blocking(move || {
            let mut guard = registry.lock().map_err(|_| OrganizerError::Poisoned)?;
            f(&mut *guard).map_err(OrganizerError::from)
        })
        .await
        .map_err(|e| OrganizerError::Task(e.to_string()))?
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn is_plain_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

fn scan_collections(root: &Path) -> std::io::Result<Vec<Collection>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut collections = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let mut photos: Vec<String> = std::fs::read_dir(entry.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| is_supported_photo(&e.path()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        if photos.is_empty() {
            continue;
        }
        photos.sort();
        collections.push(Collection {
            name: entry.file_name().to_string_lossy().into_owned(),
            photos,
        });
    }
    collections.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(collections)
}
