//! Error types for corpus loading, embedding and retrieval

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Corpus not found at {0:?}")]
    CorpusNotFound(PathBuf),

    #[error("Failed to read corpus {path:?}: {source}")]
    CorpusRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport failure, non-2xx status or malformed body from the embedding service
    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Failed to write embedding cache {path:?}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read embedding cache {path:?}: {source}")]
    CacheRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Embedding cache {path:?} is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// The cache was built from a different corpus, chunk size or embedding model.
    #[error("Embedding cache {path:?} is stale: expected {expected}, found {found}")]
    CacheStale {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("k must be at least 1")]
    InvalidK,

    #[error("Vector dimension mismatch: index has {expected}, query has {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Retrieval failed: {0}")]
    Retrieval(#[source] Box<Error>),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),
}

impl Error {
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingProvider(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a failure that happened while answering a query.
    pub fn retrieval(err: Error) -> Self {
        match err {
            Error::Retrieval(_) => err,
            other => Error::Retrieval(Box::new(other)),
        }
    }

    /// Whether this error must stop the process from serving questions.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Retrieval(_) | Error::Generation(_) | Error::InvalidScenario(_)
        )
    }
}
