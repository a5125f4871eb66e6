//! Domain types shared by the sync engine, the vector store and the query side.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChunkId = String;

/// Stable identity of a source document: its file name inside the corpus
/// directory. It is the only join key between a corpus scan and the index
/// record, and it must fit on a single line of the record file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Returns `None` for empty names and names containing line breaks.
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(&['\n', '\r'][..]) {
            return None;
        }
        Some(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A chunk of a source document that is embedded and retrieved on its own.
///
/// - `id`: `<doc_id>:<chunk_index>`, unique within one ingestion of a document
/// - `doc_id`/`doc_path`: provenance
/// - `chunk_index`/`total_chunks`: position within the parent document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: DocumentId,
    pub doc_path: String,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

impl Chunk {
    pub fn chunk_id(doc_id: &DocumentId, chunk_index: usize) -> ChunkId {
        format!("{doc_id}:{chunk_index}")
    }
}

/// An embedding plus the chunk it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: ChunkId,
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

impl VectorEntry {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self { id: chunk.id.clone(), vector, chunk }
    }
}

/// A retrieved chunk. Higher `score` is always better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_rejects_line_breaks_and_empty_names() {
        assert!(DocumentId::new("").is_none());
        assert!(DocumentId::new("a\nb.txt").is_none());
        assert!(DocumentId::new("a\rb.txt").is_none());
        let id = DocumentId::new(" spaced name.txt").expect("valid id");
        assert_eq!(id.as_str(), " spaced name.txt");
    }

    #[test]
    fn chunk_id_joins_document_and_position() {
        let id = DocumentId::new("manual.txt").expect("valid id");
        assert_eq!(Chunk::chunk_id(&id, 3), "manual.txt:3");
    }
}
