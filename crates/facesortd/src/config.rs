use facesort_core::DetectorOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "facesort.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file (`FACESORT_CONFIG`, or
/// `facesort.toml` in the data directory), then `FACESORT_*` environment
/// variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address of the web interface.
    pub bind: String,
    /// Root of registered samples, categorized photos and the database.
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite database path (default: `<data_dir>/registry.db`).
    pub db_path: Option<PathBuf>,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Minimum detector score for a face.
    pub detector_confidence: f32,
    /// Faces smaller than this many pixels on either side are ignored.
    pub min_face_size: f32,
    /// At most this many faces per photo are compared against the registry.
    pub max_faces_per_photo: usize,
    /// Upload limit for one form submission, in MiB.
    pub max_upload_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".to_string(),
            data_dir: facesort_core::data_home().join("facesort"),
            model_dir: facesort_core::default_model_dir(),
            db_path: None,
            similarity_threshold: 0.40,
            detector_confidence: 0.5,
            min_face_size: 30.0,
            max_faces_per_photo: 16,
            max_upload_mb: 64,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources(|key| std::env::var(key).ok())
    }

    /// Load using `env` as the environment lookup.
    pub fn from_sources(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(dir) = env("FACESORT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        let (file, explicit) = match env("FACESORT_CONFIG") {
            Some(path) => (PathBuf::from(path), true),
            None => (config.data_dir.join(CONFIG_FILE_NAME), false),
        };
        if explicit || file.exists() {
            config = Self::from_file(&file)?;
            tracing::info!(path = %file.display(), "loaded config file");
        }

        config.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("FACESORT_BIND") {
            self.bind = v;
        }
        if let Some(v) = env("FACESORT_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env("FACESORT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("FACESORT_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        env_parse(env, "FACESORT_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        env_parse(env, "FACESORT_DETECTOR_CONFIDENCE", &mut self.detector_confidence);
        env_parse(env, "FACESORT_MIN_FACE_SIZE", &mut self.min_face_size);
        env_parse(env, "FACESORT_MAX_FACES", &mut self.max_faces_per_photo);
        env_parse(env, "FACESORT_MAX_UPLOAD_MB", &mut self.max_upload_mb);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detector_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detector_confidence must be within [0, 1], got {}",
                self.detector_confidence
            )));
        }
        if self.max_faces_per_photo == 0 {
            return Err(ConfigError::Invalid("max_faces_per_photo must be at least 1".into()));
        }
        if self.max_upload_mb == 0 {
            return Err(ConfigError::Invalid("max_upload_mb must be at least 1".into()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("registry.db"))
    }

    /// Reference samples, one folder per person.
    pub fn registered_dir(&self) -> PathBuf {
        self.data_dir.join("registered")
    }

    /// Sorted output, one folder per person plus `unknown`.
    pub fn categorized_dir(&self) -> PathBuf {
        self.data_dir.join("categorized")
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.detector_confidence,
            min_face_size: self.min_face_size,
            ..DetectorOptions::default()
        }
    }
}

/// Overwrite `target` with a parsed env value. Unparseable values are logged and ignored.
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = env(key) {
        match raw.parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable setting"),
        }
    }
}
