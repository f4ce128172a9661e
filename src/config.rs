//! Configuration loaded from TOML, every field optional

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub path: PathBuf,
    /// Chunk length in characters
    pub chunk_size: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/nursing_guide_cleaned.txt"),
            chunk_size: 300,
        }
    }
}

/// What to do when the cache was built from a different corpus than the one on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Keep serving the cached chunks and log a warning.
    #[default]
    Pin,
    /// Refuse to start.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub on_stale: StalePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/embedded_knowledge.json"),
            on_stale: StalePolicy::Pin,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "intfloat-multilingual-e5-large-instruct".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "zephyr".to_string(),
            system_prompt:
                "You are a helpful nursing assistant. Answer based on the context only."
                    .to_string(),
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

impl Config {
    /// Loads `path` if given, otherwise the per-user config file if one exists,
    /// otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .map_err(|e| Error::config(format!("Failed to read {path:?}: {e}")))?;
                tracing::info!("Loaded configuration from {:?}", path);
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(e.to_string()))
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kkh-chatbot").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.chunk_size()?;
        if self.retrieval.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be at least 1"));
        }
        Ok(())
    }

    pub fn chunk_size(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.corpus.chunk_size)
            .ok_or_else(|| Error::config("corpus.chunk_size must be at least 1"))
    }
}
