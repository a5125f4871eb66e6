//! In-memory vector store using cosine similarity.
//!
//! Collections live in a map shared by every clone of [`InMemoryStore`], so a
//! store handed to several engine runs behaves like one persistent location.
//! Suitable for development and tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::traits::{VectorIndex, VectorStore};
use crate::types::{SearchHit, VectorEntry};

#[derive(Debug, Default)]
struct Collection {
    name: String,
    dim: usize,
    entries: Vec<VectorEntry>,
    persisted: usize,
}

type Shared = Arc<Mutex<HashMap<PathBuf, Collection>>>;

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    locations: Shared,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count as of the last `persist` at `location`.
    pub fn persisted_count(&self, location: &Path) -> Option<usize> {
        lock(&self.locations).ok()?.get(location).map(|c| c.persisted)
    }

    /// Every entry stored at `location`, in insertion order.
    pub fn entries(&self, location: &Path) -> Vec<VectorEntry> {
        lock(&self.locations)
            .ok()
            .and_then(|map| map.get(location).map(|c| c.entries.clone()))
            .unwrap_or_default()
    }
}

fn lock(shared: &Shared) -> Result<MutexGuard<'_, HashMap<PathBuf, Collection>>> {
    shared.lock().map_err(|_| Error::VectorStoreFailure("in-memory store lock poisoned".into()))
}

impl VectorStore for InMemoryStore {
    type Index = InMemoryIndex;

    fn exists(&self, location: &Path, collection: &str) -> Result<bool> {
        Ok(lock(&self.locations)?.get(location).is_some_and(|c| c.name == collection))
    }

    fn create_or_open(&self, location: &Path, collection: &str, dim: usize) -> Result<InMemoryIndex> {
        let mut map = lock(&self.locations)?;
        let created = !map.contains_key(location);
        let existing = map.entry(location.to_path_buf()).or_insert_with(|| Collection {
            name: collection.to_string(),
            dim,
            ..Collection::default()
        });
        if existing.name != collection {
            return Err(Error::CollectionMismatch {
                location: location.to_path_buf(),
                expected: collection.to_string(),
                found: existing.name.clone(),
            });
        }
        if existing.dim != dim {
            return Err(Error::VectorStoreFailure(format!(
                "collection '{collection}' stores {}-dimensional vectors, embedder produces {dim}",
                existing.dim
            )));
        }
        Ok(InMemoryIndex {
            locations: Arc::clone(&self.locations),
            location: location.to_path_buf(),
            collection: collection.to_string(),
            dim,
            created,
        })
    }
}

#[derive(Debug)]
pub struct InMemoryIndex {
    locations: Shared,
    location: PathBuf,
    collection: String,
    dim: usize,
    created: bool,
}

impl InMemoryIndex {
    fn with_collection<T>(&self, f: impl FnOnce(&mut Collection) -> T) -> Result<T> {
        let mut map = lock(&self.locations)?;
        let collection = map.get_mut(&self.location).ok_or_else(|| {
            Error::VectorStoreFailure(format!("location {} vanished", self.location.display()))
        })?;
        Ok(f(collection))
    }
}

impl VectorIndex for InMemoryIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn was_created(&self) -> bool {
        self.created
    }

    fn upsert_batch(&mut self, entries: &[VectorEntry]) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != self.dim) {
            return Err(Error::VectorStoreFailure(format!(
                "entry {} has {} dimensions, collection expects {}",
                bad.id,
                bad.vector.len(),
                self.dim
            )));
        }
        self.with_collection(|c| c.entries.extend_from_slice(entries))
    }

    fn count(&self) -> Result<usize> {
        self.with_collection(|c| c.entries.len())
    }

    fn persist(&mut self) -> Result<()> {
        self.with_collection(|c| c.persisted = c.entries.len())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.with_collection(|c| {
            let mut scored: Vec<SearchHit> = c
                .entries
                .iter()
                .map(|e| SearchHit { chunk: e.chunk.clone(), score: cosine_similarity(&e.vector, query) })
                .collect();
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            scored
        })
    }
}

/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
