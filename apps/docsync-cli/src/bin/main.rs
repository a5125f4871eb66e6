use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::debug;

use docsync_core::config::{Config, Settings};
use docsync_core::data_processor::DataProcessor;
use docsync_core::record::IndexRecordStore;
use docsync_core::traits::{VectorIndex, VectorStore};
use docsync_embed::embedder_from_settings;
use docsync_ingest::{plan, SyncEngine, SyncOutcome, SyncState};
use docsync_query::{generator_from_settings, QueryService};
use docsync_vector::LanceStore;

#[derive(Parser)]
#[command(version, about = "Keep a vector index in sync with a document folder and ask it questions")]
struct Cli {
    /// Config file; defaults to config.toml (+ config.<RUST_ENV>.toml) in the working directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Index documents the index record has not seen yet
    Sync {
        #[arg(long)]
        corpus: Option<PathBuf>,
    },
    /// Answer a question from the indexed documents
    Ask {
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show what the next sync would do
    Status,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    let config = match path {
        Some(p) => Config::load_file(p)?,
        None => Config::load()?,
    };
    debug!(base = %config.base_dir().display(), "loaded configuration");
    Ok(config.settings()?)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_ref()).context("loading configuration")?;

    match cli.cmd {
        Cmd::Sync { corpus } => {
            if let Some(dir) = corpus {
                settings.corpus.dir = dir;
            }
            let embedder = embedder_from_settings(&settings.embedding)?;
            let chunker = Box::new(DataProcessor::new(settings.chunking.clone()));
            let engine = SyncEngine::new(&settings, LanceStore::new()?, chunker, embedder).with_progress(true);
            match engine.run()? {
                SyncOutcome::Bootstrapped(report) => println!(
                    "Bootstrapped {} documents ({} chunks); index holds {} vectors",
                    report.documents.len(),
                    report.chunks,
                    report.vector_count
                ),
                SyncOutcome::Synced(report) => println!(
                    "Synced {} new documents ({} chunks); index holds {} vectors",
                    report.documents.len(),
                    report.chunks,
                    report.vector_count
                ),
                SyncOutcome::Idle { vector_count } => println!("Up to date; index holds {vector_count} vectors"),
            }
        }
        Cmd::Ask { question, top_k } => {
            if let Some(k) = top_k {
                settings.query.top_k = k;
            }
            let embedder = embedder_from_settings(&settings.embedding)?;
            let store = LanceStore::new()?;
            if !store.exists(&settings.index.location, &settings.index.collection)? {
                bail!(
                    "no collection '{}' at {}; run `docsync sync` first",
                    settings.index.collection,
                    settings.index.location.display()
                );
            }
            let index = store.create_or_open(&settings.index.location, &settings.index.collection, embedder.dim())?;
            let generator = generator_from_settings(&settings.llm)?;
            let service = QueryService::new(&settings.query, index, embedder, generator)?;
            let answer = service.answer(&question)?;
            println!("{}", answer.text);
            if !answer.passages.is_empty() {
                println!("\nSources:");
                for (i, hit) in answer.passages.iter().enumerate() {
                    println!("  [{}] {} (chunk {}/{}, score {:.3})", i + 1, hit.chunk.doc_id, hit.chunk.chunk_index + 1, hit.chunk.total_chunks, hit.score);
                }
            }
        }
        Cmd::Status => {
            let store = LanceStore::new()?;
            let exists = store.exists(&settings.index.location, &settings.index.collection)?;
            let collection = if exists {
                let index = store.create_or_open(&settings.index.location, &settings.index.collection, settings.embedding.dim)?;
                format!("{} vectors", index.count()?)
            } else {
                "not created".to_string()
            };
            let record = IndexRecordStore::new(&settings.index.record_file);
            let next = plan(&settings.corpus.dir, &record)?;
            let state = match next.state {
                SyncState::Bootstrap => "bootstrap",
                SyncState::Sync => "sync",
            };
            println!("Corpus:      {} ({} documents)", settings.corpus.dir.display(), next.snapshot.len());
            println!("Record:      {} ({} documents)", record.path().display(), next.recorded.len());
            println!("Collection:  {} at {} ({collection})", settings.index.collection, settings.index.location.display());
            println!("Next run:    {state}, {} new documents", next.new_documents.len());
            for doc in &next.new_documents {
                println!("  + {doc}");
            }
        }
    }
    Ok(())
}
