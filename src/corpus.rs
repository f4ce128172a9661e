use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A contiguous slice of the corpus, identified by its position in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Reads the whole corpus file as UTF-8.
pub fn read_corpus(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => Error::CorpusNotFound(path.to_path_buf()),
        _ => Error::CorpusRead {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Reads the corpus and partitions it into fixed-size chunks.
pub fn load(path: impl AsRef<Path>, chunk_size: NonZeroUsize) -> Result<Vec<Chunk>> {
    let text = read_corpus(path)?;
    Ok(split_into_chunks(&text, chunk_size))
}

/// Splits text into non-overlapping chunks of exactly `chunk_size` characters;
/// the last chunk holds the remainder.
pub fn split_into_chunks(text: &str, chunk_size: NonZeroUsize) -> Vec<Chunk> {
    let chunk_size = chunk_size.get();
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == chunk_size {
            chunks.push(Chunk {
                index: chunks.len(),
                text: text[start..offset].to_string(),
            });
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(Chunk {
            index: chunks.len(),
            text: text[start..].to_string(),
        });
    }

    chunks
}

/// Hex SHA-256 of the corpus text, recorded in the cache to detect divergence.
pub fn corpus_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
