use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::corpus::{self, Chunk};
use crate::embedder::{EmbedRole, Embedder};
use crate::embedding_cache::{self, CacheArtifact, Fingerprint};
use crate::error::{Error, Result};
use crate::ranker::{FlatIndex, NearestNeighbors};

/// Chunks and their vectors, built once at startup and read-only afterwards.
/// Share it between concurrent questions behind an `Arc`.
pub struct RetrievalIndex {
    chunks: Vec<Chunk>,
    neighbors: Box<dyn NearestNeighbors>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl RetrievalIndex {
    pub fn new(
        chunks: Vec<Chunk>,
        neighbors: Box<dyn NearestNeighbors>,
        embedder: Arc<dyn Embedder>,
        top_k: usize,
    ) -> Result<Self> {
        if chunks.len() != neighbors.len() {
            return Err(Error::config(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                neighbors.len()
            )));
        }
        if top_k == 0 {
            return Err(Error::InvalidK);
        }

        Ok(Self {
            chunks,
            neighbors,
            embedder,
            top_k,
        })
    }

    /// Loads the corpus and the embedding cache, building the cache if absent.
    pub async fn build(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let cache_path = config.cache.path.as_path();
        let artifact = Self::load_artifact(config, cache_path, embedder.as_ref()).await?;

        let (chunks, vectors) = artifact.into_parts();
        let neighbors = FlatIndex::new(&vectors)
            .map_err(|e| Error::corrupt(cache_path, e.to_string()))?;

        tracing::info!(
            "Retrieval index ready: {} chunks, {} dimensions",
            neighbors.len(),
            neighbors.dimensions()
        );
        Self::new(chunks, Box::new(neighbors), embedder, config.retrieval.top_k)
    }

    async fn load_artifact(
        config: &Config,
        cache_path: &Path,
        embedder: &dyn Embedder,
    ) -> Result<CacheArtifact> {
        let chunk_size = config.chunk_size()?;

        match corpus::read_corpus(&config.corpus.path) {
            Ok(text) => {
                let chunks = corpus::split_into_chunks(&text, chunk_size);
                let fingerprint = Fingerprint {
                    corpus_sha256: corpus::corpus_hash(&text),
                    chunk_size: chunk_size.get(),
                };
                embedding_cache::load_or_build(
                    cache_path,
                    &chunks,
                    &fingerprint,
                    embedder,
                    config.cache.on_stale,
                )
                .await
            }
            Err(Error::CorpusNotFound(path)) => match embedding_cache::load(cache_path)? {
                Some(artifact) => {
                    artifact.check_model(cache_path, embedder.name())?;
                    tracing::warn!(
                        "Corpus {:?} not found; serving {} chunks from {:?}",
                        path,
                        artifact.len(),
                        cache_path
                    );
                    Ok(artifact)
                }
                None => Err(Error::CorpusNotFound(path)),
            },
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Returns up to `k` chunks most similar to the question, best first.
    pub async fn search(&self, question: &str, k: usize) -> Result<Vec<(&Chunk, f32)>> {
        self.search_inner(question, k).await.map_err(Error::retrieval)
    }

    async fn search_inner(&self, question: &str, k: usize) -> Result<Vec<(&Chunk, f32)>> {
        let query = self.embedder.embed(&EmbedRole::Query.apply(question)).await?;
        let ranked = self.neighbors.top_k(&query, k)?;

        tracing::debug!(
            "Top {} of {} chunks: {:?}",
            ranked.len(),
            self.len(),
            ranked.iter().map(|r| (r.index, r.score)).collect::<Vec<_>>()
        );

        Ok(ranked
            .into_iter()
            .map(|r| (&self.chunks[r.index], r.score))
            .collect())
    }

    /// Builds the generation context: the top chunks' text in rank order,
    /// separated by blank lines.
    pub async fn retrieve(&self, question: &str) -> Result<String> {
        let hits = self.search(question, self.top_k).await?;
        Ok(hits
            .iter()
            .map(|(chunk, _)| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
