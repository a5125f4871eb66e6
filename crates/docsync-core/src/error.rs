use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::DocumentId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corpus directory {} is unavailable: {reason}", .path.display())]
    CorpusUnavailable { path: PathBuf, reason: String },

    #[error("Index record {} is corrupt: {reason}", .path.display())]
    RecordStoreCorrupt { path: PathBuf, reason: String },

    #[error("Failed to write index record {}: {source}", .path.display())]
    RecordStoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read document {doc}: {reason}")]
    DocumentUnreadable { doc: DocumentId, reason: String },

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Vector store failure: {0}")]
    VectorStoreFailure(String),

    #[error("Collection mismatch at {}: requested '{expected}', store holds '{found}'", .location.display())]
    CollectionMismatch {
        location: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Answer generation failed: {0}")]
    Generation(String),
}

impl Error {
    pub fn embedding(err: impl Display) -> Self {
        Self::EmbeddingFailure(format!("{err:#}"))
    }

    pub fn vector_store(err: impl Display) -> Self {
        Self::VectorStoreFailure(format!("{err:#}"))
    }

    pub fn generation(err: impl Display) -> Self {
        Self::Generation(format!("{err:#}"))
    }

    /// True when the failed batch's ids never made it into the index record,
    /// so the next run retries the same documents. A `RecordStoreIo` from a
    /// failed append may leave a partial last line; it collapses on load and
    /// the documents it misses are ingested again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingFailure(_)
                | Self::VectorStoreFailure(_)
                | Self::DocumentUnreadable { .. }
                | Self::RecordStoreIo { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
