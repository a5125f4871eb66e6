//! docsync-query
//!
//! Read-only question answering over a synced collection.

use std::sync::Arc;

use tracing::{debug, info};

use docsync_core::config::QuerySettings;
use docsync_core::traits::{Embedder, Generator, VectorIndex};
use docsync_core::{Error, Result, SearchHit};

pub mod generator;

pub use generator::{build_prompt, generator_from_settings, ExtractiveGenerator, OllamaGenerator};

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub passages: Vec<SearchHit>,
}

pub struct QueryService<I: VectorIndex> {
    index: I,
    embedder: Arc<dyn Embedder>,
    generator: Box<dyn Generator>,
    top_k: usize,
}

impl<I: VectorIndex> QueryService<I> {
    pub fn new(settings: &QuerySettings, index: I, embedder: Arc<dyn Embedder>, generator: Box<dyn Generator>) -> Result<Self> {
        if settings.top_k == 0 {
            return Err(Error::InvalidConfig("query.top_k must be at least 1".into()));
        }
        Ok(Self { index, embedder, generator, top_k: settings.top_k })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed_query(query).map_err(Error::embedding)?;
        let hits = self.index.search(&vector, self.top_k)?;
        debug!(collection = self.index.collection(), hits = hits.len(), "retrieved passages");
        Ok(hits)
    }

    pub fn answer(&self, query: &str) -> Result<Answer> {
        let passages = self.retrieve(query)?;
        let context: Vec<_> = passages.iter().map(|hit| hit.chunk.clone()).collect();
        let text = self.generator.generate(query, &context).map_err(Error::generation)?;
        info!(passages = passages.len(), "answered query");
        Ok(Answer { text, passages })
    }
}
