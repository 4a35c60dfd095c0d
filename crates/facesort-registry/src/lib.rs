//! facesort-registry — Registered people and their reference samples.
//!
//! Rows live in SQLite; each sample image is copied to
//! `<samples_dir>/<person>/sample_<seq>.<ext>` next to its embedding row.

mod schema;

use chrono::Utc;
use facesort_core::{Embedding, ReferenceFace};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Folder name that collects photos matching nobody. Not a valid person name.
pub const UNKNOWN_FOLDER: &str = "unknown";

const MAX_NAME_CHARS: usize = 64;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid person name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("{0:?} is reserved for unmatched photos")]
    ReservedName(String),
    #[error("no reference samples supplied")]
    NoSamples,
    #[error("person not found: {0}")]
    NotFound(String),
    #[error("failed to store sample {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A reference sample ready to be stored.
pub struct NewSample {
    /// Image to copy into the registry.
    pub source: PathBuf,
    pub embedding: Embedding,
    /// Detector confidence of the face the embedding came from.
    pub quality: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub id: String,
    /// 1-based position within the person's samples.
    pub seq: u32,
    pub path: PathBuf,
    pub quality: f32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub samples: Vec<Sample>,
}

/// Case-folded form of a person name; two names with the same key are the
/// same person.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Check a person name and return its trimmed form.
pub fn validate_name(name: &str) -> Result<String, RegistryError> {
    let trimmed = name.trim();
    let invalid = |reason| RegistryError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(invalid("longer than 64 characters"));
    }
    if trimmed.contains(['/', '\\']) {
        return Err(invalid("contains a path separator"));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(invalid("contains control characters"));
    }
    if trimmed.starts_with('.') {
        return Err(invalid("starts with '.'"));
    }
    if name_key(trimmed) == UNKNOWN_FOLDER {
        return Err(RegistryError::ReservedName(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

pub struct Registry {
    conn: Connection,
    samples_dir: PathBuf,
}

impl Registry {
    /// Open (or create) the registry database at `db_path`.
    pub fn open(db_path: &Path, samples_dir: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(db_path)?;
        tracing::info!(path = %db_path.display(), "registry opened");
        Self::init(conn, samples_dir)
    }

    /// In-memory database; sample files still go to `samples_dir`.
    pub fn open_in_memory(samples_dir: &Path) -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?, samples_dir)
    }

    fn init(conn: Connection, samples_dir: &Path) -> Result<Self, RegistryError> {
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn,
            samples_dir: samples_dir.to_path_buf(),
        })
    }

    /// Register `name` with reference samples, or append samples to an
    /// existing person (names compare case-insensitively).
    ///
    /// Either every sample is stored or none is.
    pub fn register(&mut self, name: &str, samples: &[NewSample]) -> Result<Person, RegistryError> {
        let name = validate_name(name)?;
        if samples.is_empty() {
            return Err(RegistryError::NoSamples);
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, name FROM persons WHERE name_key = ?1",
                [name_key(&name)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (person_id, stored_name) = match existing {
            Some(found) => found,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO persons (id, name, name_key, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, name, name_key(&name), now],
                )?;
                tracing::info!(person = %name, "person created");
                (id, name)
            }
        };

        let last_seq: u32 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM samples WHERE person_id = ?1",
            [&person_id],
            |row| row.get(0),
        )?;

        let person_dir = self.samples_dir.join(&stored_name);
        let mut copied: Vec<PathBuf> = Vec::with_capacity(samples.len());

        let stored = insert_samples(&tx, &person_id, &person_dir, last_seq, samples, &now, &mut copied)
            .and_then(|()| tx.commit().map_err(RegistryError::from));

        if let Err(e) = stored {
            for path in &copied {
                let _ = fs::remove_file(path);
            }
            tracing::warn!(person = %stored_name, error = %e, "registration rolled back");
            return Err(e);
        }

        tracing::info!(person = %stored_name, added = samples.len(), "reference samples stored");
        self.person(&stored_name)?
            .ok_or(RegistryError::NotFound(stored_name))
    }

    /// All registered people, sorted by name.
    pub fn persons(&self) -> Result<Vec<Person>, RegistryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM persons ORDER BY name_key")?;
        let heads = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<(String, String, String)>, _>>()?;

        heads
            .into_iter()
            .map(|(id, name, created_at)| {
                let samples = self.samples_of(&id)?;
                Ok(Person { id, name, created_at, samples })
            })
            .collect()
    }

    pub fn person(&self, name: &str) -> Result<Option<Person>, RegistryError> {
        let head: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM persons WHERE name_key = ?1",
                [name_key(name)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        head.map(|(id, name, created_at)| {
            let samples = self.samples_of(&id)?;
            Ok(Person { id, name, created_at, samples })
        })
        .transpose()
    }

    pub fn count(&self) -> Result<usize, RegistryError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Delete a person, their samples and the sample files. Returns false if
    /// nobody by that name is registered.
    pub fn remove(&mut self, name: &str) -> Result<bool, RegistryError> {
        let Some(person) = self.person(name)? else {
            return Ok(false);
        };

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM samples WHERE person_id = ?1", [&person.id])?;
        tx.execute("DELETE FROM persons WHERE id = ?1", [&person.id])?;
        tx.commit()?;

        let dir = self.samples_dir.join(&person.name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %dir.display(), error = %e, "failed to remove sample directory"),
        }

        tracing::info!(person = %person.name, samples = person.samples.len(), "person removed");
        Ok(true)
    }

    /// Every reference embedding of every person.
    pub fn gallery(&self) -> Result<Vec<ReferenceFace>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, p.name, s.embedding, s.model_version
             FROM samples s JOIN persons p ON p.id = s.person_id
             ORDER BY p.name_key, s.seq",
        )?;
        let gallery = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(ReferenceFace {
                    id: row.get(0)?,
                    person: row.get(1)?,
                    embedding: Embedding::from_bytes(&bytes, row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(gallery)
    }

    fn samples_of(&self, person_id: &str) -> Result<Vec<Sample>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, seq, path, quality, created_at FROM samples WHERE person_id = ?1 ORDER BY seq",
        )?;
        let samples = stmt
            .query_map([person_id], |row| {
                Ok(Sample {
                    id: row.get(0)?,
                    seq: row.get(1)?,
                    path: PathBuf::from(row.get::<_, String>(2)?),
                    quality: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }
}

/// Copy each sample into `person_dir` and insert its row. Every copied
/// file is pushed onto `copied` so the caller can undo on failure.
fn insert_samples(
    tx: &Transaction<'_>,
    person_id: &str,
    person_dir: &Path,
    last_seq: u32,
    samples: &[NewSample],
    now: &str,
    copied: &mut Vec<PathBuf>,
) -> Result<(), RegistryError> {
    fs::create_dir_all(person_dir).map_err(|source| RegistryError::Io {
        path: person_dir.to_path_buf(),
        source,
    })?;

    for (offset, sample) in samples.iter().enumerate() {
        let seq = last_seq + offset as u32 + 1;
        let dest = person_dir.join(format!("sample_{seq}.{}", sample_extension(&sample.source)));
        fs::copy(&sample.source, &dest).map_err(|source| RegistryError::Io {
            path: sample.source.clone(),
            source,
        })?;
        copied.push(dest.clone());

        tx.execute(
            "INSERT INTO samples (id, person_id, seq, path, embedding, model_version, quality, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid::Uuid::new_v4().to_string(),
                person_id,
                seq,
                dest.to_string_lossy().into_owned(),
                sample.embedding.to_bytes(),
                sample.embedding.model_version,
                sample.quality,
                now,
            ],
        )?;
    }
    Ok(())
}

/// Lowercased extension of the source image, `jpg` when it has none.
fn sample_extension(source: &Path) -> String {
    source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}
