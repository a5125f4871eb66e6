//! Seams between the sync engine and its collaborators.
//!
//! Chunking, embedding and generation are external concerns and report opaque
//! `anyhow` errors; the engine maps them onto [`crate::Error`]. Vector stores
//! speak the typed error directly because their failures drive the sync state
//! machine.

use std::path::Path;

use crate::error::Result;
use crate::types::{Chunk, DocumentId, SearchHit, VectorEntry};

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed_query(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[query.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for the query"))
    }
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, doc_id: &DocumentId, path: &Path) -> anyhow::Result<Vec<Chunk>>;
}

/// The language-model side of the query path.
pub trait Generator: Send + Sync {
    fn generate(&self, query: &str, context: &[Chunk]) -> anyhow::Result<String>;
}

/// An open collection inside a vector store.
///
/// Entries are only ever added. `count` must reflect every successful
/// `upsert_batch` immediately.
pub trait VectorIndex {
    fn collection(&self) -> &str;
    /// True when `create_or_open` had to create the collection for this handle.
    fn was_created(&self) -> bool;
    fn upsert_batch(&mut self, entries: &[VectorEntry]) -> Result<()>;
    fn count(&self) -> Result<usize>;
    fn persist(&mut self) -> Result<()>;
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;
}

/// Opens collections at a storage location.
pub trait VectorStore {
    type Index: VectorIndex;

    fn exists(&self, location: &Path, collection: &str) -> Result<bool>;

    /// Opens the collection if `location` already holds it, otherwise creates
    /// an empty one. Never overwrites. Fails with `CollectionMismatch` when the
    /// location was created for a different collection.
    fn create_or_open(&self, location: &Path, collection: &str, dim: usize) -> Result<Self::Index>;
}
