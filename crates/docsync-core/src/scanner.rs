//! Corpus scanning: which documents exist right now.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::DocumentId;

/// The documents present in the corpus directory at scan time. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusSnapshot {
    documents: BTreeMap<DocumentId, PathBuf>,
}

impl CorpusSnapshot {
    pub fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.keys()
    }

    pub fn path(&self, id: &DocumentId) -> Option<&Path> {
        self.documents.get(id).map(PathBuf::as_path)
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<(DocumentId, PathBuf)> for CorpusSnapshot {
    fn from_iter<I: IntoIterator<Item = (DocumentId, PathBuf)>>(iter: I) -> Self {
        Self { documents: iter.into_iter().collect() }
    }
}

/// Lists the regular files directly under `dir`. Subdirectories and hidden
/// files are ignored; symlinks count when they point at a regular file.
pub fn scan(dir: &Path) -> Result<CorpusSnapshot> {
    let unavailable = |reason: String| Error::CorpusUnavailable { path: dir.to_path_buf(), reason };
    let meta = fs::metadata(dir).map_err(|e| unavailable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }

    let mut documents = BTreeMap::new();
    let walker = walkdir::WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(unavailable(e.to_string())),
            Err(e) => {
                warn!(error = %e, "skipping unreadable corpus entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "skipping document with a non UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let Some(id) = DocumentId::new(name) else {
            warn!(path = %entry.path().display(), "skipping document whose name contains a line break");
            continue;
        };
        documents.insert(id, entry.into_path());
    }
    debug!(dir = %dir.display(), documents = documents.len(), "scanned corpus");
    Ok(CorpusSnapshot { documents })
}
