//! Runtime configuration, loaded from TOML with environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rag::chunker::{DEFAULT_CHUNK_WORDS, DEFAULT_OVERLAP_WORDS};
use crate::rag::embedding::DEFAULT_MAX_FEATURES;

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "RAG_TUTOR_CONFIG";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "RAG_TUTOR_DATA_DIR";

/// Environment variable overriding the image similarity threshold.
pub const THRESHOLD_ENV: &str = "IMAGE_SIMILARITY_THRESHOLD";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Data directory not found")]
    DataDirNotFound,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    /// Root of all persisted artifacts
    pub data_dir: PathBuf,
    /// Index payloads, sidecars and vocabularies (defaults to `<data_dir>/vectors`)
    pub vector_dir: Option<PathBuf>,
    /// Image catalog sidecars (defaults to `<data_dir>/metadata`)
    pub metadata_dir: Option<PathBuf>,
    /// Chunks retrieved per question
    pub top_k_chunks: usize,
    /// Best image is dropped when its similarity is below this
    pub image_similarity_threshold: f32,
    /// Words per chunk
    pub chunk_size: usize,
    /// Words shared by consecutive chunks
    pub chunk_overlap: usize,
    /// Vocabulary cap per namespace
    pub max_features: usize,
    /// Loaded topic indexes and catalogs kept in memory
    pub index_cache_capacity: usize,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir().unwrap_or_else(|_| PathBuf::from("data")),
            vector_dir: None,
            metadata_dir: None,
            top_k_chunks: 3,
            image_similarity_threshold: 0.25,
            chunk_size: DEFAULT_CHUNK_WORDS,
            chunk_overlap: DEFAULT_OVERLAP_WORDS,
            max_features: DEFAULT_MAX_FEATURES,
            index_cache_capacity: 16,
        }
    }
}

impl TutorConfig {
    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("rag-tutor"))
            .ok_or(ConfigError::DataDirNotFound)
    }

    /// Defaults with every artifact under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration from an optional file plus environment overrides.
    ///
    /// An explicit `path` wins over `RAG_TUTOR_CONFIG`.
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };

        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var(THRESHOLD_ENV) {
            config.image_similarity_threshold = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a number, got {:?}", THRESHOLD_ENV, raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k_chunks == 0 {
            return Err(ConfigError::Invalid("top_k_chunks must be at least 1".into()));
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.image_similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "image_similarity_threshold must be within [0, 1], got {}",
                self.image_similarity_threshold
            )));
        }
        if self.max_features == 0 {
            return Err(ConfigError::Invalid("max_features must be at least 1".into()));
        }
        Ok(())
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.vector_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vectors"))
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.metadata_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("metadata"))
    }

    /// Create the artifact directories.
    pub fn init_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.vector_dir())?;
        fs::create_dir_all(self.metadata_dir())?;
        Ok(())
    }
}
