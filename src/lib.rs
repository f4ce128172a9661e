//! Retrieval-augmented question answering over a fixed nursing knowledge corpus.
//!
//! The corpus is split into fixed-size chunks, each chunk is embedded once and
//! cached on disk, and questions are answered from the chunks whose vectors
//! score highest against the question's vector.

pub mod config;
pub mod corpus;
pub mod embedder;
pub mod embedding_cache;
pub mod error;
pub mod fluids;
pub mod llm;
pub mod ranker;
pub mod retriever;

pub use error::{Error, Result};
