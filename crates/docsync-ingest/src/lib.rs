//! docsync-ingest
//!
//! The sync state machine. A run either bootstraps a fresh index from the whole
//! corpus or appends the documents the index record has not seen yet.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use docsync_core::config::Settings;
use docsync_core::delta::delta;
use docsync_core::record::IndexRecordStore;
use docsync_core::scanner::{scan, CorpusSnapshot};
use docsync_core::traits::{Chunker, Embedder, VectorIndex, VectorStore};
use docsync_core::{DocumentId, Error, Result, VectorEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No index record yet: build everything from scratch.
    Bootstrap,
    /// Index record present: only unrecorded documents are ingested.
    Sync,
}

#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub state: SyncState,
    pub snapshot: CorpusSnapshot,
    pub recorded: BTreeSet<DocumentId>,
    pub new_documents: BTreeSet<DocumentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: Vec<DocumentId>,
    pub chunks: usize,
    pub vector_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Bootstrapped(IngestReport),
    Synced(IngestReport),
    Idle { vector_count: usize },
}

impl SyncOutcome {
    pub fn vector_count(&self) -> usize {
        match self {
            Self::Bootstrapped(report) | Self::Synced(report) => report.vector_count,
            Self::Idle { vector_count } => *vector_count,
        }
    }
}

/// Picks the next state from the record and lists the unrecorded documents.
/// A record that cannot be read sends the run back to bootstrap.
pub fn plan(corpus_dir: &Path, record: &IndexRecordStore) -> Result<SyncPlan> {
    let snapshot = scan(corpus_dir)?;
    let (state, recorded) = if !record.exists() {
        (SyncState::Bootstrap, BTreeSet::new())
    } else {
        match record.load_checked() {
            Ok(recorded) => (SyncState::Sync, recorded),
            Err(err) => {
                warn!(error = %err, "index record unreadable, treating it as empty");
                (SyncState::Bootstrap, BTreeSet::new())
            }
        }
    };
    let new_documents = delta(snapshot.ids(), &recorded);
    debug!(?state, corpus = snapshot.len(), recorded = recorded.len(), new = new_documents.len(), "planned sync");
    Ok(SyncPlan { state, snapshot, recorded, new_documents })
}

pub struct SyncEngine<S: VectorStore> {
    corpus_dir: PathBuf,
    location: PathBuf,
    collection: String,
    batch_documents: usize,
    record: IndexRecordStore,
    store: S,
    chunker: Box<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    show_progress: bool,
}

impl<S: VectorStore> SyncEngine<S> {
    pub fn new(settings: &Settings, store: S, chunker: Box<dyn Chunker>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            corpus_dir: settings.corpus.dir.clone(),
            location: settings.index.location.clone(),
            collection: settings.index.collection.clone(),
            batch_documents: settings.index.batch_documents.max(1),
            record: IndexRecordStore::new(&settings.index.record_file),
            store,
            chunker,
            embedder,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    pub fn record(&self) -> &IndexRecordStore {
        &self.record
    }

    pub fn index_exists(&self) -> Result<bool> {
        self.store.exists(&self.location, &self.collection)
    }

    /// Scans the corpus and diffs it against the record without touching
    /// anything on disk.
    pub fn plan(&self) -> Result<SyncPlan> {
        plan(&self.corpus_dir, &self.record)
    }

    pub fn run(&self) -> Result<SyncOutcome> {
        let plan = self.plan()?;
        match plan.state {
            SyncState::Bootstrap => self.bootstrap(&plan),
            SyncState::Sync => self.sync(&plan),
        }
    }

    fn open_index(&self) -> Result<S::Index> {
        self.store.create_or_open(&self.location, &self.collection, self.embedder.dim())
    }

    fn bootstrap(&self, plan: &SyncPlan) -> Result<SyncOutcome> {
        let index = self.open_index()?;
        self.bootstrap_into(index, plan)
    }

    fn bootstrap_into(&self, mut index: S::Index, plan: &SyncPlan) -> Result<SyncOutcome> {
        info!(corpus = %self.corpus_dir.display(), documents = plan.new_documents.len(), "bootstrapping index");
        let existing = index.count()?;
        if existing > 0 {
            warn!(vectors = existing, "collection already holds vectors without a record; re-ingesting everything");
        }
        self.record.initialize(std::iter::empty())?;
        let report = self.ingest(&mut index, plan)?;
        index.persist()?;
        info!(documents = report.documents.len(), chunks = report.chunks, vectors = report.vector_count, "bootstrap complete");
        Ok(SyncOutcome::Bootstrapped(report))
    }

    fn sync(&self, plan: &SyncPlan) -> Result<SyncOutcome> {
        let mut index = self.open_index()?;
        if index.was_created() && !plan.recorded.is_empty() {
            // The record names vectors this store never held.
            warn!(
                recorded = plan.recorded.len(),
                location = %self.location.display(),
                "collection was missing while the record lists documents; rebuilding from the whole corpus"
            );
            let rebuild = SyncPlan {
                state: SyncState::Bootstrap,
                snapshot: plan.snapshot.clone(),
                recorded: BTreeSet::new(),
                new_documents: plan.snapshot.ids().cloned().collect(),
            };
            return self.bootstrap_into(index, &rebuild);
        }
        if plan.new_documents.is_empty() {
            let vector_count = index.count()?;
            info!(vectors = vector_count, "index is up to date");
            return Ok(SyncOutcome::Idle { vector_count });
        }
        info!(new = plan.new_documents.len(), "syncing new documents");
        let report = self.ingest(&mut index, plan)?;
        info!(documents = report.documents.len(), chunks = report.chunks, vectors = report.vector_count, "sync complete");
        Ok(SyncOutcome::Synced(report))
    }

    /// Each batch is upserted and persisted before its ids reach the record,
    /// so an abort leaves the unfinished batches for the next run.
    fn ingest(&self, index: &mut S::Index, plan: &SyncPlan) -> Result<IngestReport> {
        let docs: Vec<&DocumentId> = plan.new_documents.iter().collect();
        let pb = self.progress_bar(docs.len());
        let mut report = IngestReport::default();

        for batch in docs.chunks(self.batch_documents) {
            let mut entries = Vec::new();
            for &doc in batch {
                pb.set_message(doc.to_string());
                let path = plan.snapshot.path(doc).ok_or_else(|| Error::DocumentUnreadable {
                    doc: doc.clone(),
                    reason: "not present in corpus snapshot".into(),
                })?;
                entries.extend(self.vectorize(doc, path)?);
                pb.inc(1);
            }
            index.upsert_batch(&entries)?;
            index.persist()?;
            self.record.append(batch.iter().copied())?;
            debug!(documents = batch.len(), chunks = entries.len(), "batch recorded");
            report.documents.extend(batch.iter().map(|d| (*d).clone()));
            report.chunks += entries.len();
        }
        pb.finish_and_clear();
        report.vector_count = index.count()?;
        Ok(report)
    }

    fn vectorize(&self, doc: &DocumentId, path: &Path) -> Result<Vec<VectorEntry>> {
        let chunks = self.chunker.chunk(doc, path).map_err(|e| Error::DocumentUnreadable {
            doc: doc.clone(),
            reason: format!("{e:#}"),
        })?;
        if chunks.is_empty() {
            debug!(%doc, "document produced no chunks");
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).map_err(Error::embedding)?;
        if vectors.len() != chunks.len() {
            return Err(Error::EmbeddingFailure(format!(
                "embedder returned {} vectors for {} chunks of {doc}",
                vectors.len(),
                chunks.len()
            )));
        }
        let dim = self.embedder.dim();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::EmbeddingFailure(format!(
                "embedder returned a {}-dimensional vector for {doc}, expected {dim}",
                bad.len()
            )));
        }
        Ok(chunks.into_iter().zip(vectors).map(|(chunk, vector)| VectorEntry::new(chunk, vector)).collect())
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents {msg}")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}
