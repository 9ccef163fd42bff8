//! Configuration for chunking, retrieval, model services and storage.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Complete docqa configuration.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocqaConfig {
    /// Chunking limits
    pub chunking: ChunkingConfig,
    /// Ranking settings
    pub retrieval: RetrievalConfig,
    /// Embedding and generation services
    pub models: ModelsConfig,
    /// Snapshot location
    pub storage: StorageConfig,
}

/// Chunking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk
    pub max_chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub overlap_size: usize,
    /// Maximum chunks a single document may produce
    pub max_chunks: usize,
    /// Maximum size of an uploaded file in bytes
    pub max_file_bytes: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap_size: 200,
            max_chunks: 1000,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of results returned per query
    pub top_k: usize,
    /// Fixed embedding dimension; when unset the first document decides
    pub embedding_dimension: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            embedding_dimension: None,
        }
    }
}

/// Model service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Ollama host, without port
    pub ollama_host: String,
    /// Ollama port
    pub ollama_port: u16,
    /// Embedding model name
    pub embedding_model: String,
    /// Generation model name
    pub generation_model: String,
    /// Maximum texts per embedding request
    pub embedding_batch_size: usize,
    /// Sampling temperature for generation
    pub temperature: f32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            ollama_host: "http://localhost".to_owned(),
            ollama_port: 11434,
            embedding_model: "nomic-embed-text".to_owned(),
            generation_model: "qwen2.5:7b".to_owned(),
            embedding_batch_size: 32,
            temperature: 0.3,
        }
    }
}

impl ModelsConfig {
    /// Scheme plus host of the Ollama service, and the port to reach it on.
    ///
    /// `ollama_host` may omit the scheme and may carry its own port, as
    /// `OLLAMA_HOST` usually does (`127.0.0.1:11434`). An explicit port wins
    /// over `ollama_port`. Returns `None` when the host is not a valid URL.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        let host = self.ollama_host.trim().trim_end_matches('/');
        let raw = if host.contains("://") {
            host.to_owned()
        } else {
            format!("http://{host}")
        };
        let url = Url::parse(&raw).ok()?;
        let name = url.host_str()?;

        // `Url` hides a port equal to the scheme default, so check the text.
        let port = if has_explicit_port(&raw) {
            url.port_or_known_default().unwrap_or(self.ollama_port)
        } else {
            self.ollama_port
        };
        Some((format!("{}://{name}", url.scheme()), port))
    }

    /// Base URL of the Ollama service, e.g. `http://localhost:11434`.
    pub fn base_url(&self) -> String {
        let (host, port) = self.host_and_port();
        format!("{host}:{port}")
    }

    /// Host (with scheme, without port) and port for clients that take them
    /// separately.
    pub fn host_and_port(&self) -> (String, u16) {
        self.endpoint().unwrap_or_else(|| {
            (
                self.ollama_host.trim().trim_end_matches('/').to_owned(),
                self.ollama_port,
            )
        })
    }
}

/// Whether the authority part of `url` ends in `:<port>`.
fn has_explicit_port(url: &str) -> bool {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.parse::<u16>().is_ok())
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the catalog snapshot; defaults to `~/.docqa/data`
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Snapshot file name inside the data directory.
    pub const SNAPSHOT_FILE: &'static str = "catalog.bin";

    /// Resolve the data directory, falling back to `~/.docqa/data`.
    ///
    /// # Errors
    /// Returns an error if no directory is configured and the home directory
    /// cannot be determined
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(DocqaConfig::config_dir()?.join("data")),
        }
    }

    /// Full path of the catalog snapshot.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be resolved
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join(Self::SNAPSHOT_FILE))
    }
}

impl DocqaConfig {
    /// Get the default config directory path (`~/.docqa`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_owned()))?;
        Ok(home.join(".docqa"))
    }

    /// Get the default config file path (`~/.docqa/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default location, creating it with default
    /// values if it doesn't exist. Environment overrides are applied last.
    ///
    /// # Errors
    /// Returns an error if the config cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            config
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|error| Error::Config(format!("Failed to serialize config: {error}")))?;

        let header = "# docqa configuration file\n\
                      # This file is automatically generated on first run\n\n";

        fs::write(path, format!("{header}{contents}"))?;
        Ok(())
    }

    /// Apply `OLLAMA_HOST`, `EMBEDDING_MODEL`, `GENERATION_MODEL` and
    /// `DOCQA_DATA_DIR` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("OLLAMA_HOST") {
            self.models.ollama_host = host;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            self.models.embedding_model = model;
        }
        if let Ok(model) = env::var("GENERATION_MODEL") {
            self.models.generation_model = model;
        }
        if let Ok(dir) = env::var("DOCQA_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Reject settings that would make chunking or retrieval meaningless.
    ///
    /// # Errors
    /// Returns a configuration error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chunk_size == 0 {
            return Err(Error::Config("chunking.max_chunk_size must be positive".to_owned()));
        }
        if self.chunking.overlap_size >= self.chunking.max_chunk_size {
            return Err(Error::Config(
                "chunking.overlap_size must be smaller than max_chunk_size".to_owned(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be positive".to_owned()));
        }
        if self.models.endpoint().is_none() {
            return Err(Error::Config(format!(
                "models.ollama_host is not a valid URL: {}",
                self.models.ollama_host
            )));
        }
        if self.models.embedding_batch_size == 0 {
            return Err(Error::Config(
                "models.embedding_batch_size must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}
