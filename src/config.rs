//! Engine configuration.
//!
//! Configuration is fixed when a [`KnowledgeBase`](crate::KnowledgeBase) is
//! constructed. It can be deserialized with serde, read from `KB_*`
//! environment variables, or built in code starting from
//! [`KbConfig::default`].

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    error::{Error, Result},
    model_manager::DEFAULT_MODEL_ID,
};

/// Default number of query results.
pub const DEFAULT_TOP_K: usize = 3;

/// Where the index and catalog artifacts are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One file per artifact in the storage directory.
    #[default]
    Files,
    /// Both artifacts in a single redb database.
    Redb,
}

impl FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "files" | "file" => Ok(Self::Files),
            "redb" => Ok(Self::Redb),
            other => Err(Error::Config(format!(
                "unknown storage backend '{other}' (expected 'files' or 'redb')"
            ))),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Files => "files",
            Self::Redb => "redb",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KbConfig {
    /// When false, mutations fail with `Disabled` and queries return nothing.
    pub enabled: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Default result count for queries.
    pub top_k: usize,
    /// Embedding model identifier; `hash:<dims>` selects the offline embedder.
    pub embedding_model: String,
    /// Storage directory. `None` falls back to `KB_STORAGE_PATH`, then the
    /// XDG data home.
    pub storage_path: Option<PathBuf>,
    pub storage_backend: StorageBackend,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            embedding_model: DEFAULT_MODEL_ID.to_string(),
            storage_path: None,
            storage_backend: StorageBackend::Files,
        }
    }
}

impl KbConfig {
    /// Defaults overridden by any `KB_*` environment variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`KbConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("KB_ENABLED") {
            config.enabled = parse_bool("KB_ENABLED", &v)?;
        }
        if let Some(v) = lookup("KB_CHUNK_SIZE") {
            config.chunk_size = parse_number("KB_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("KB_CHUNK_OVERLAP") {
            config.chunk_overlap = parse_number("KB_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("KB_TOP_K") {
            config.top_k = parse_number("KB_TOP_K", &v)?;
        }
        if let Some(v) = lookup("KB_EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        if let Some(v) = lookup("KB_STORAGE_PATH").filter(|v| !v.is_empty()) {
            config.storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KB_STORAGE_BACKEND") {
            config.storage_backend = v.parse()?;
        }

        Ok(config)
    }

    /// Check the values that must hold before the engine can start.
    pub fn validate(&self) -> Result<()> {
        self.chunking()?;
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be greater than zero".into()));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(Error::Config("embedding model must be set".into()));
        }
        Ok(())
    }

    pub fn chunking(&self) -> Result<ChunkingConfig> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{key} must be a non-negative integer, got '{value}'"))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}
