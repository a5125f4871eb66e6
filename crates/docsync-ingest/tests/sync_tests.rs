use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use docsync_core::config::Settings;
use docsync_core::data_processor::DataProcessor;
use docsync_core::memory::{InMemoryIndex, InMemoryStore};
use docsync_core::traits::{Embedder, VectorIndex, VectorStore};
use docsync_core::{Chunk, DocumentId, Error, SearchHit, VectorEntry};
use docsync_ingest::{SyncEngine, SyncOutcome, SyncState};

const DIM: usize = 8;

/// Deterministic embedder that can be told to fail.
#[derive(Default)]
struct StubEmbedder {
    fail: AtomicBool,
    poison: Option<&'static str>,
    short_vectors: bool,
}

impl Embedder for StubEmbedder {
    fn dim(&self) -> usize {
        DIM
    }

    fn max_len(&self) -> usize {
        512
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("embedding backend offline");
        }
        if let Some(word) = self.poison {
            if texts.iter().any(|t| t.contains(word)) {
                anyhow::bail!("cannot embed '{word}'");
            }
        }
        let width = if self.short_vectors { DIM - 1 } else { DIM };
        Ok(texts
            .iter()
            .map(|t| (0..width).map(|i| ((t.len() + i) % 5) as f32 + 1.0).collect())
            .collect())
    }
}

struct Fixture {
    _tmp: TempDir,
    settings: Settings,
    store: InMemoryStore,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.corpus.dir = tmp.path().join("corpus");
        settings.index.location = tmp.path().join("index");
        settings.index.record_file = tmp.path().join("state").join("indexed.txt");
        settings.embedding.dim = DIM;
        fs::create_dir_all(&settings.corpus.dir).unwrap();
        Self { _tmp: tmp, settings, store: InMemoryStore::new() }
    }

    fn write(&self, name: &str, body: &str) {
        fs::write(self.settings.corpus.dir.join(name), body).unwrap();
    }

    fn engine_with(&self, embedder: Arc<dyn Embedder>) -> SyncEngine<InMemoryStore> {
        SyncEngine::new(&self.settings, self.store.clone(), Box::new(DataProcessor::default()), embedder)
    }

    fn engine(&self) -> SyncEngine<InMemoryStore> {
        self.engine_with(Arc::new(StubEmbedder::default()))
    }

    fn location(&self) -> &Path {
        &self.settings.index.location
    }

    fn vector_count(&self) -> usize {
        self.store.entries(self.location()).len()
    }

    fn recorded(&self) -> BTreeSet<DocumentId> {
        docsync_core::record::IndexRecordStore::new(&self.settings.index.record_file).load()
    }
}

fn ids(names: &[&str]) -> BTreeSet<DocumentId> {
    names.iter().map(|n| DocumentId::new(*n).unwrap()).collect()
}

#[test]
fn first_run_bootstraps_the_whole_corpus() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha one\n\nalpha two");
    fx.write("b.txt", "bravo");

    let engine = fx.engine();
    assert_eq!(engine.plan().unwrap().state, SyncState::Bootstrap);
    let outcome = engine.run().expect("bootstrap");

    let SyncOutcome::Bootstrapped(report) = outcome else { panic!("expected bootstrap, got {outcome:?}") };
    assert_eq!(report.documents, ids(&["a.txt", "b.txt"]).into_iter().collect::<Vec<_>>());
    assert_eq!(report.chunks, 3);
    assert_eq!(report.vector_count, 3);
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
    assert_eq!(fx.store.persisted_count(fx.location()), Some(3));
}

#[test]
fn repeated_runs_without_changes_are_idle() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "bravo");
    let engine = fx.engine();
    engine.run().unwrap();

    for _ in 0..3 {
        assert_eq!(engine.run().unwrap(), SyncOutcome::Idle { vector_count: 2 });
    }
    assert_eq!(fx.vector_count(), 2);
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
    assert!(engine.plan().unwrap().new_documents.is_empty());
}

#[test]
fn added_document_is_the_only_one_ingested() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "bravo");
    let engine = fx.engine();
    engine.run().unwrap();
    let before = fx.vector_count();

    fx.write("c.txt", "charlie one\n\ncharlie two");
    let plan = engine.plan().unwrap();
    assert_eq!(plan.state, SyncState::Sync);
    assert_eq!(plan.new_documents, ids(&["c.txt"]));

    let SyncOutcome::Synced(report) = engine.run().unwrap() else { panic!("expected sync") };
    assert_eq!(report.documents, vec![DocumentId::new("c.txt").unwrap()]);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.vector_count, before + 2);
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt", "c.txt"]));
    assert_eq!(fx.store.persisted_count(fx.location()), Some(before + 2));
}

#[test]
fn removed_documents_leave_vectors_in_place() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "bravo");
    let engine = fx.engine();
    engine.run().unwrap();

    fs::remove_file(fx.settings.corpus.dir.join("b.txt")).unwrap();
    assert_eq!(engine.run().unwrap(), SyncOutcome::Idle { vector_count: 2 });
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
}

#[test]
fn empty_document_is_recorded_without_vectors() {
    let fx = Fixture::new();
    fx.write("empty.txt", "");
    fx.write("full.txt", "content");
    let SyncOutcome::Bootstrapped(report) = fx.engine().run().unwrap() else { panic!("expected bootstrap") };
    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.chunks, 1);
    assert_eq!(fx.recorded(), ids(&["empty.txt", "full.txt"]));
}

#[test]
fn empty_corpus_bootstrap_creates_record_and_collection() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let SyncOutcome::Bootstrapped(report) = engine.run().unwrap() else { panic!("expected bootstrap") };
    assert!(report.documents.is_empty());
    assert_eq!(report.vector_count, 0);
    assert!(engine.record().exists());
    assert!(engine.index_exists().unwrap());
    assert_eq!(fx.store.persisted_count(fx.location()), Some(0));
    assert_eq!(engine.run().unwrap(), SyncOutcome::Idle { vector_count: 0 });
}

#[test]
fn interrupted_run_is_reprocessed_with_duplicates() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    let engine = fx.engine();
    engine.run().unwrap();

    // Vectors for d.txt reach the index but the process dies before the record is appended.
    fx.write("d.txt", "delta");
    let doc = DocumentId::new("d.txt").unwrap();
    let mut index = fx.store.create_or_open(fx.location(), "documents", DIM).unwrap();
    let chunk = Chunk {
        id: Chunk::chunk_id(&doc, 0),
        doc_id: doc.clone(),
        doc_path: "d.txt".into(),
        content: "delta".into(),
        chunk_index: 0,
        total_chunks: 1,
    };
    index.upsert_batch(&[VectorEntry::new(chunk, vec![1.0; DIM])]).unwrap();
    index.persist().unwrap();
    assert_eq!(fx.vector_count(), 2);

    assert_eq!(engine.plan().unwrap().new_documents, ids(&["d.txt"]));
    let SyncOutcome::Synced(report) = engine.run().unwrap() else { panic!("expected sync") };
    assert_eq!(report.vector_count, 3);
    let copies = fx.store.entries(fx.location()).iter().filter(|e| e.id == "d.txt:0").count();
    assert_eq!(copies, 2, "duplicate vectors are tolerated");
    assert_eq!(fx.recorded(), ids(&["a.txt", "d.txt"]));
}

#[test]
fn embedding_failure_leaves_record_untouched_and_retries() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    let embedder = Arc::new(StubEmbedder::default());
    let engine = fx.engine_with(embedder.clone());
    engine.run().unwrap();

    fx.write("b.txt", "bravo");
    embedder.fail.store(true, Ordering::SeqCst);
    let err = engine.run().unwrap_err();
    assert!(matches!(err, Error::EmbeddingFailure(_)), "got {err}");
    assert!(err.is_retryable());
    assert_eq!(fx.recorded(), ids(&["a.txt"]));
    assert_eq!(fx.vector_count(), 1);

    embedder.fail.store(false, Ordering::SeqCst);
    let SyncOutcome::Synced(report) = engine.run().unwrap() else { panic!("expected sync") };
    assert_eq!(report.documents, vec![DocumentId::new("b.txt").unwrap()]);
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
}

#[test]
fn completed_batches_stay_recorded_after_a_later_failure() {
    let mut fx = Fixture::new();
    fx.settings.index.batch_documents = 1;
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "bravo");
    fx.write("c.txt", "poison pill");
    let engine = fx.engine_with(Arc::new(StubEmbedder { poison: Some("poison"), ..StubEmbedder::default() }));

    assert!(matches!(engine.run(), Err(Error::EmbeddingFailure(_))));
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
    assert_eq!(fx.store.persisted_count(fx.location()), Some(2));

    let plan = engine.plan().unwrap();
    assert_eq!(plan.state, SyncState::Sync);
    assert_eq!(plan.new_documents, ids(&["c.txt"]));
}

#[test]
fn wrong_width_embeddings_are_an_embedding_failure() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    let engine = fx.engine_with(Arc::new(StubEmbedder { short_vectors: true, ..StubEmbedder::default() }));
    let err = engine.run().unwrap_err();
    assert!(matches!(err, Error::EmbeddingFailure(_)), "got {err}");
    assert!(fx.recorded().is_empty());
}

#[test]
fn collection_mismatch_is_fatal_and_side_effect_free() {
    let mut fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.engine().run().unwrap();
    fx.write("b.txt", "bravo");

    fx.settings.index.collection = "manuals".into();
    let err = fx.engine().run().unwrap_err();
    assert!(matches!(err, Error::CollectionMismatch { .. }), "got {err}");
    assert!(!err.is_retryable());
    assert_eq!(fx.recorded(), ids(&["a.txt"]));
    assert_eq!(fx.vector_count(), 1);
}

#[test]
fn corrupt_record_triggers_full_reingest_and_heals() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "bravo");
    let engine = fx.engine();
    engine.run().unwrap();

    fs::write(&fx.settings.index.record_file, [0xff, 0xfe, b'\n']).unwrap();
    let plan = engine.plan().unwrap();
    assert_eq!(plan.state, SyncState::Bootstrap);
    assert_eq!(plan.new_documents, ids(&["a.txt", "b.txt"]));

    let outcome = engine.run().unwrap();
    assert!(matches!(outcome, SyncOutcome::Bootstrapped(_)));
    assert_eq!(outcome.vector_count(), 4, "existing collection is reopened, not replaced");
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
    assert_eq!(engine.run().unwrap(), SyncOutcome::Idle { vector_count: 4 });
}

#[test]
fn missing_corpus_is_reported_before_any_write() {
    let mut fx = Fixture::new();
    fx.settings.corpus.dir = fx.settings.corpus.dir.join("missing");
    let engine = fx.engine();
    let err = engine.run().unwrap_err();
    assert!(matches!(err, Error::CorpusUnavailable { .. }), "got {err}");
    assert!(!engine.record().exists());
    assert!(!engine.index_exists().unwrap());
}

#[test]
fn vector_count_never_decreases() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let mut last = 0;
    for (i, body) in ["one", "two\n\nthree", "", "four five"].iter().enumerate() {
        fx.write(&format!("doc{i}.txt"), body);
        let count = engine.run().unwrap().vector_count();
        assert!(count >= last);
        last = count;
    }
    assert_eq!(last, 4);
}

#[test]
fn lost_collection_with_a_record_is_rebuilt_from_the_corpus() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "bravo one\n\nbravo two");
    fx.engine().run().unwrap();
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));

    // Same record file, but the vector store it describes is gone.
    let empty_store = InMemoryStore::new();
    let engine = SyncEngine::new(
        &fx.settings,
        empty_store.clone(),
        Box::new(DataProcessor::default()),
        Arc::new(StubEmbedder::default()),
    );
    let outcome = engine.run().unwrap();
    let SyncOutcome::Bootstrapped(report) = &outcome else { panic!("expected a rebuild, got {outcome:?}") };
    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.vector_count, 3);
    assert_eq!(empty_store.entries(fx.location()).len(), 3);
    assert_eq!(empty_store.persisted_count(fx.location()), Some(3));
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
    assert_eq!(engine.run().unwrap(), SyncOutcome::Idle { vector_count: 3 });
}

#[test]
fn fresh_collection_with_an_empty_record_is_a_plain_sync() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    docsync_core::record::IndexRecordStore::new(&fx.settings.index.record_file)
        .initialize(std::iter::empty())
        .unwrap();
    let outcome = fx.engine().run().unwrap();
    assert!(matches!(outcome, SyncOutcome::Synced(_)), "got {outcome:?}");
    assert_eq!(outcome.vector_count(), 1);
}

/// Store whose indexes fail the first `failures` upserts.
#[derive(Clone)]
struct FlakyStore {
    inner: InMemoryStore,
    failures: Arc<AtomicUsize>,
}

struct FlakyIndex {
    inner: InMemoryIndex,
    failures: Arc<AtomicUsize>,
}

impl VectorStore for FlakyStore {
    type Index = FlakyIndex;

    fn exists(&self, location: &Path, collection: &str) -> docsync_core::Result<bool> {
        self.inner.exists(location, collection)
    }

    fn create_or_open(&self, location: &Path, collection: &str, dim: usize) -> docsync_core::Result<FlakyIndex> {
        Ok(FlakyIndex { inner: self.inner.create_or_open(location, collection, dim)?, failures: self.failures.clone() })
    }
}

impl VectorIndex for FlakyIndex {
    fn collection(&self) -> &str {
        self.inner.collection()
    }

    fn was_created(&self) -> bool {
        self.inner.was_created()
    }

    fn upsert_batch(&mut self, entries: &[VectorEntry]) -> docsync_core::Result<()> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::VectorStoreFailure("disk full".into()));
        }
        self.inner.upsert_batch(entries)
    }

    fn count(&self) -> docsync_core::Result<usize> {
        self.inner.count()
    }

    fn persist(&mut self) -> docsync_core::Result<()> {
        self.inner.persist()
    }

    fn search(&self, query: &[f32], k: usize) -> docsync_core::Result<Vec<SearchHit>> {
        self.inner.search(query, k)
    }
}

#[test]
fn vector_store_failure_during_bootstrap_is_retried_next_run() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "bravo");
    let store = FlakyStore { inner: fx.store.clone(), failures: Arc::new(AtomicUsize::new(1)) };
    let engine = SyncEngine::new(&fx.settings, store, Box::new(DataProcessor::default()), Arc::new(StubEmbedder::default()));

    let err = engine.run().unwrap_err();
    assert!(matches!(err, Error::VectorStoreFailure(_)), "got {err}");
    assert!(engine.record().exists(), "bootstrap initialized the record");
    assert!(fx.recorded().is_empty());

    let plan = engine.plan().unwrap();
    assert_eq!(plan.state, SyncState::Sync);
    assert_eq!(plan.new_documents, ids(&["a.txt", "b.txt"]));
    let SyncOutcome::Synced(report) = engine.run().unwrap() else { panic!("expected sync") };
    assert_eq!(report.vector_count, 2);
    assert_eq!(fx.recorded(), ids(&["a.txt", "b.txt"]));
}
