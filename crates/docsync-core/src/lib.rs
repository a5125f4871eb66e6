//! docsync-core
//!
//! Shared domain types, configuration and the pure bookkeeping pieces of the
//! sync engine: corpus scanning, the index record and the delta computation.

pub mod config;
pub mod data_processor;
pub mod delta;
pub mod error;
pub mod memory;
pub mod record;
pub mod scanner;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{Chunk, ChunkId, DocumentId, SearchHit, VectorEntry};
