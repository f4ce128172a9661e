//! On-disk store of chunk embeddings, built once and then authoritative.
//!
//! The artifact is JSON. Files written by older deployments are a bare array
//! of `{chunk, embedding}` records without a corpus fingerprint; those are
//! still readable and always treated as pinned.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::StalePolicy;
use crate::corpus::Chunk;
use crate::embedder::{EmbedRole, Embedder};
use crate::error::{Error, Result};

pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheArtifact {
    pub version: u32,
    pub model: String,
    pub corpus_sha256: Option<String>,
    pub chunk_size: Option<usize>,
    pub records: Vec<EmbeddingRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCache {
    Legacy(Vec<EmbeddingRecord>),
    Current(CacheArtifact),
}

/// Identifies the corpus and chunking a cache was (or would be) built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub corpus_sha256: String,
    pub chunk_size: usize,
}

impl CacheArtifact {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.records.first().map_or(0, |r| r.embedding.len())
    }

    /// Splits the records into chunks (indexed by position) and their vectors.
    pub fn into_parts(self) -> (Vec<Chunk>, Vec<Vec<f32>>) {
        self.records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                (
                    Chunk {
                        index,
                        text: record.chunk,
                    },
                    record.embedding,
                )
            })
            .unzip()
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.version > CACHE_VERSION {
            return Err(Error::corrupt(
                path,
                format!("unsupported cache version {}", self.version),
            ));
        }

        let dims = self.dimensions();
        if let Some(pos) = self
            .records
            .iter()
            .position(|r| r.embedding.is_empty() || r.embedding.len() != dims)
        {
            return Err(Error::corrupt(
                path,
                format!(
                    "record {pos} has {} dimensions, expected {dims}",
                    self.records[pos].embedding.len()
                ),
            ));
        }
        Ok(())
    }

    /// Vectors from another model are not comparable with query vectors, so a
    /// model change always fails regardless of the stale policy. Legacy
    /// artifacts record no model and are accepted.
    pub fn check_model(&self, path: &Path, model: &str) -> Result<()> {
        if self.model.is_empty() || self.model == model {
            return Ok(());
        }
        Err(Error::CacheStale {
            path: path.to_path_buf(),
            expected: format!("model {model}"),
            found: format!("model {}", self.model),
        })
    }

    fn check_fresh(&self, path: &Path, current: &Fingerprint, on_stale: StalePolicy) -> Result<()> {
        let Some(cached_hash) = &self.corpus_sha256 else {
            tracing::debug!("Cache {:?} has no corpus fingerprint, using it as-is", path);
            return Ok(());
        };

        let same_chunking = self.chunk_size.is_none_or(|size| size == current.chunk_size);
        if *cached_hash == current.corpus_sha256 && same_chunking {
            return Ok(());
        }

        match on_stale {
            StalePolicy::Pin => {
                tracing::warn!(
                    "Embedding cache {:?} was built from a different corpus or chunk size; \
                     serving cached chunks. Delete the cache to rebuild.",
                    path
                );
                Ok(())
            }
            StalePolicy::Reject => Err(Error::CacheStale {
                path: path.to_path_buf(),
                expected: current.corpus_sha256.clone(),
                found: cached_hash.clone(),
            }),
        }
    }
}

/// Reads the cache artifact, or `None` if it does not exist.
pub fn load(path: &Path) -> Result<Option<CacheArtifact>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::CacheRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let artifact = match serde_json::from_slice::<StoredCache>(&bytes) {
        Ok(StoredCache::Current(artifact)) => artifact,
        Ok(StoredCache::Legacy(records)) => CacheArtifact {
            version: 0,
            model: String::new(),
            corpus_sha256: None,
            chunk_size: None,
            records,
        },
        Err(e) => return Err(Error::corrupt(path, e.to_string())),
    };

    artifact.validate(path)?;
    Ok(Some(artifact))
}

/// Embeds every chunk and atomically writes the artifact. Nothing is written
/// unless every chunk embedded successfully.
pub async fn build(
    path: &Path,
    chunks: &[Chunk],
    fingerprint: &Fingerprint,
    embedder: &dyn Embedder,
) -> Result<CacheArtifact> {
    tracing::info!(
        "Building embedding cache for {} chunks with {}",
        chunks.len(),
        embedder.name()
    );

    let mut records: Vec<EmbeddingRecord> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let embedding = embedder.embed(&EmbedRole::Passage.apply(&chunk.text)).await?;

        if let Some(first) = records.first().map(|r| r.embedding.len()) {
            if embedding.len() != first {
                return Err(Error::embedding(format!(
                    "chunk {} embedded to {} dimensions, expected {first}",
                    chunk.index,
                    embedding.len()
                )));
            }
        }

        tracing::debug!("Embedded chunk {}/{}", chunk.index + 1, chunks.len());
        records.push(EmbeddingRecord {
            chunk: chunk.text.clone(),
            embedding,
        });
    }

    let artifact = CacheArtifact {
        version: CACHE_VERSION,
        model: embedder.name().to_string(),
        corpus_sha256: Some(fingerprint.corpus_sha256.clone()),
        chunk_size: Some(fingerprint.chunk_size),
        records,
    };

    persist(path, &artifact)?;
    tracing::info!("Wrote embedding cache to {:?}", path);
    Ok(artifact)
}

/// Returns the existing cache if there is one, otherwise builds it from `chunks`.
pub async fn load_or_build(
    path: &Path,
    chunks: &[Chunk],
    fingerprint: &Fingerprint,
    embedder: &dyn Embedder,
    on_stale: StalePolicy,
) -> Result<CacheArtifact> {
    match load(path)? {
        Some(artifact) => {
            artifact.check_model(path, embedder.name())?;
            artifact.check_fresh(path, fingerprint, on_stale)?;
            tracing::info!("Loaded {} cached embeddings from {:?}", artifact.len(), path);
            Ok(artifact)
        }
        None => build(path, chunks, fingerprint, embedder).await,
    }
}

fn persist(path: &Path, artifact: &CacheArtifact) -> Result<()> {
    let write_err = |source: io::Error| Error::CacheWrite {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, artifact)
            .map_err(|e| write_err(io::Error::from(e)))?;
        writer.flush().map_err(write_err)?;
    }
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::split_into_chunks;
    use crate::embedder::stub::StubEmbedder;
    use std::num::NonZeroUsize;
    use tempfile::tempdir;

    fn chunks(text: &str) -> Vec<Chunk> {
        split_into_chunks(text, NonZeroUsize::new(4).unwrap())
    }

    fn fingerprint(hash: &str) -> Fingerprint {
        Fingerprint {
            corpus_sha256: hash.to_string(),
            chunk_size: 4,
        }
    }

    fn abc_embedder() -> StubEmbedder {
        StubEmbedder::new()
            .with("passage: AAAA", &[1.0, 0.0, 0.0])
            .with("passage: BBBB", &[0.0, 1.0, 0.0])
            .with("passage: CCCC", &[0.1234567, -0.000_001, 3.4e38])
    }

    #[tokio::test]
    async fn test_build_then_reload_round_trips() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cache.json");
        let embedder = abc_embedder();

        let built = build(&path, &chunks("AAAABBBBCCCC"), &fingerprint("h1"), &embedder).await?;
        assert_eq!(embedder.calls(), 3);

        let loaded = load(&path)?.expect("cache should exist");
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.dimensions(), 3);
        for (a, b) in built.records.iter().zip(&loaded.records) {
            assert_eq!(a.chunk, b.chunk);
            let a_bits: Vec<u32> = a.embedding.iter().map(|v| v.to_bits()).collect();
            let b_bits: Vec<u32> = b.embedding.iter().map(|v| v.to_bits()).collect();
            assert_eq!(a_bits, b_bits);
        }

        let (chunks, vectors) = loaded.into_parts();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["AAAA", "BBBB", "CCCC"]);
        assert_eq!(chunks[2].index, 2);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_cache_is_not_rebuilt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("cache.json");
        let embedder = abc_embedder();
        let fp = fingerprint("h1");

        load_or_build(&path, &chunks("AAAABBBB"), &fp, &embedder, StalePolicy::Pin).await?;
        assert_eq!(embedder.calls(), 2);

        let again =
            load_or_build(&path, &chunks("AAAABBBBCCCC"), &fp, &embedder, StalePolicy::Pin).await?;
        assert_eq!(embedder.calls(), 2);
        assert_eq!(again.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_failure_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let embedder = StubEmbedder::new().with("passage: AAAA", &[1.0, 0.0]);

        let err = build(&path, &chunks("AAAABBBB"), &fingerprint("h1"), &embedder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingProvider(_)));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_inconsistent_provider_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let embedder = StubEmbedder::new()
            .with("passage: AAAA", &[1.0, 0.0])
            .with("passage: BBBB", &[1.0, 0.0, 0.0]);

        let err = build(&path, &chunks("AAAABBBB"), &fingerprint("h1"), &embedder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingProvider(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_cache_is_none() {
        let dir = tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path), Err(Error::CacheCorrupt { .. })));

        fs::write(
            &path,
            r#"[{"chunk":"a","embedding":[1.0,0.0]},{"chunk":"b","embedding":[1.0]}]"#,
        )
        .unwrap();
        assert!(matches!(load(&path), Err(Error::CacheCorrupt { .. })));

        fs::write(&path, r#"[{"chunk":"a","embedding":[]}]"#).unwrap();
        assert!(matches!(load(&path), Err(Error::CacheCorrupt { .. })));
    }

    #[test]
    fn test_legacy_array_format() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("embedded_knowledge.json");
        fs::write(
            &path,
            r#"[
              {"chunk": "Fever in infants", "embedding": [0.1, 0.2]},
              {"chunk": "Fluid balance", "embedding": [0.3, 0.4]}
            ]"#,
        )?;

        let artifact = load(&path)?.expect("cache should exist");
        assert_eq!(artifact.len(), 2);
        assert_eq!(artifact.corpus_sha256, None);
        assert_eq!(artifact.records[1].chunk, "Fluid balance");

        assert!(
            artifact
                .check_fresh(&path, &fingerprint("anything"), StalePolicy::Reject)
                .is_ok()
        );

        fs::write(&path, "[]")?;
        assert!(load(&path)?.expect("cache should exist").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_policy() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cache.json");
        let embedder = abc_embedder();
        build(&path, &chunks("AAAA"), &fingerprint("old"), &embedder).await?;

        let pinned = load_or_build(
            &path,
            &chunks("BBBB"),
            &fingerprint("new"),
            &embedder,
            StalePolicy::Pin,
        )
        .await?;
        assert_eq!(pinned.records[0].chunk, "AAAA");

        let err = load_or_build(
            &path,
            &chunks("BBBB"),
            &fingerprint("new"),
            &embedder,
            StalePolicy::Reject,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::CacheStale { .. }));

        let resized = Fingerprint {
            corpus_sha256: "old".to_string(),
            chunk_size: 8,
        };
        let err = load_or_build(&path, &[], &resized, &embedder, StalePolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CacheStale { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_model_change_is_stale() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cache.json");
        let fp = fingerprint("h1");
        let e5 = abc_embedder().named("e5-large");
        load_or_build(&path, &chunks("AAAABBBB"), &fp, &e5, StalePolicy::Pin).await?;
        assert_eq!(load(&path)?.expect("cache should exist").model, "e5-large");

        let minilm = StubEmbedder::new()
            .named("minilm")
            .with("passage: AAAA", &[1.0, 0.0])
            .with("passage: BBBB", &[0.0, 1.0]);
        for policy in [StalePolicy::Pin, StalePolicy::Reject] {
            let err = load_or_build(&path, &chunks("AAAABBBB"), &fp, &minilm, policy)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::CacheStale { .. }), "{policy:?}");
        }
        assert_eq!(minilm.calls(), 0);

        fs::write(&path, r#"[{"chunk":"AAAA","embedding":[1.0,0.0,0.0]}]"#)?;
        let legacy = load_or_build(&path, &[], &fp, &minilm, StalePolicy::Reject).await?;
        assert_eq!(legacy.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_cache_path() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("data");
        fs::write(&blocker, "not a directory")?;
        let embedder = abc_embedder();

        let nested = blocker.join("cache.json");
        let err = build(&nested, &chunks("AAAA"), &fingerprint("h1"), &embedder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CacheWrite { .. }));

        let occupied = dir.path().join("cache.json");
        fs::create_dir(&occupied)?;
        let err = build(&occupied, &chunks("AAAA"), &fingerprint("h1"), &embedder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CacheWrite { .. }));
        assert!(occupied.is_dir());

        let mut entries: Vec<_> = fs::read_dir(dir.path())?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<io::Result<_>>()?;
        entries.sort();
        assert_eq!(entries, vec!["cache.json", "data"]);
        Ok(())
    }

    #[test]
    fn test_unreadable_cache() {
        let dir = tempdir().unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CacheRead { .. }));
        assert!(err.is_fatal());
    }
}
