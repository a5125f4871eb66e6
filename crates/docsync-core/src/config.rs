use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    /// Loads `config.toml` and `config.<env>.toml` from the working directory.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(Path::new("."))
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let env_name = env_name();
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        if let Some(file) = env_file(&env_name) {
            figment = figment.merge(Toml::file(dir.join(file)));
        }
        Ok(Self::finish(figment, dir.to_path_buf()))
    }

    /// Loads a single explicit file; relative paths inside it resolve against
    /// the file's directory.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::InvalidConfig(format!("config file {} not found", path.display())));
        }
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(path));
        Ok(Self::finish(figment, base_dir))
    }

    fn finish(figment: Figment, base_dir: PathBuf) -> Self {
        let figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self { figment, base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Typed settings with paths resolved against [`Config::base_dir`].
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings.resolve_paths(&self.base_dir))
    }
}

fn env_name() -> String {
    env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string())
}

fn env_file(env_name: &str) -> Option<&'static str> {
    match env_name {
        "dev" | "development" => Some("config.dev.toml"),
        "prod" | "production" => Some("config.prod.toml"),
        "test" | "testing" => Some("config.test.toml"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub corpus: CorpusSettings,
    pub index: IndexSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub query: QuerySettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    pub dir: PathBuf,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self { dir: PathBuf::from("data/corpus") }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Directory owned by the vector store.
    pub location: PathBuf,
    pub collection: String,
    /// Line-delimited list of documents already ingested.
    pub record_file: PathBuf,
    /// Documents embedded and recorded per batch.
    pub batch_documents: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            location: PathBuf::from("data/index/lancedb"),
            collection: "documents".to_string(),
            record_file: PathBuf::from("data/index/indexed_documents.txt"),
            batch_documents: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: usize,
    pub words_per_chunk: usize,
    pub overlap_percent: f32,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_tokens: 500, words_per_chunk: 300, overlap_percent: 0.2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingBackend {
    /// Deterministic token hashing, no model files needed.
    Fake,
    BgeM3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model_dir: Option<PathBuf>,
    pub dim: usize,
    pub max_len: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { backend: EmbeddingBackend::BgeM3, model_dir: None, dim: 1024, max_len: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub top_k: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmBackend {
    /// Answers with the retrieved passages themselves.
    Extractive,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Extractive,
            endpoint: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.index.collection.trim().is_empty() {
            return Err(Error::InvalidConfig("index.collection must not be empty".into()));
        }
        if !self.index.collection.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
            return Err(Error::InvalidConfig(format!(
                "index.collection '{}' may only contain letters, digits, '_', '-' and '.'",
                self.index.collection
            )));
        }
        if self.index.batch_documents == 0 {
            return Err(Error::InvalidConfig("index.batch_documents must be at least 1".into()));
        }
        if self.chunking.words_per_chunk == 0 || self.chunking.max_tokens == 0 {
            return Err(Error::InvalidConfig("chunking sizes must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.chunking.overlap_percent) {
            return Err(Error::InvalidConfig(format!(
                "chunking.overlap_percent must be in [0, 1), got {}",
                self.chunking.overlap_percent
            )));
        }
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be at least 1".into()));
        }
        if self.query.top_k == 0 {
            return Err(Error::InvalidConfig("query.top_k must be at least 1".into()));
        }
        Ok(())
    }

    pub fn resolve_paths(mut self, base: &Path) -> Self {
        self.corpus.dir = resolve_with_base(base, self.corpus.dir.to_string_lossy());
        self.index.location = resolve_with_base(base, self.index.location.to_string_lossy());
        self.index.record_file = resolve_with_base(base, self.index.record_file.to_string_lossy());
        self.embedding.model_dir = self
            .embedding
            .model_dir
            .map(|dir| resolve_with_base(base, dir.to_string_lossy()));
        self
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
