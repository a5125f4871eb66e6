//! The index record: which documents have already been ingested.
//!
//! Stored as UTF-8 text with one document id per line. After the first run the
//! file only ever grows by appends, so recording a batch costs O(batch) no
//! matter how large the corpus is.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::DocumentId;

#[derive(Debug, Clone)]
pub struct IndexRecordStore {
    path: PathBuf,
}

impl IndexRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Recorded ids. An unreadable or malformed file is treated as empty so
    /// the caller re-diffs against the whole corpus instead of losing documents.
    pub fn load(&self) -> BTreeSet<DocumentId> {
        match self.load_checked() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "index record unusable, treating it as empty");
                BTreeSet::new()
            }
        }
    }

    /// Like [`load`](Self::load) but reports `RecordStoreCorrupt` instead of
    /// degrading. A missing file is still an empty record.
    pub fn load_checked(&self) -> Result<BTreeSet<DocumentId>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(self.corrupt(e.to_string())),
        };
        let text = String::from_utf8(bytes).map_err(|e| self.corrupt(e.to_string()))?;
        Ok(text.lines().filter_map(|line| DocumentId::new(line)).collect())
    }

    /// Creates the record holding exactly `ids`, replacing any previous file.
    pub fn initialize<'a, I>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a DocumentId>,
    {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.io(e))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io(e))?;
        let body = render(ids);
        tmp.write_all(body.as_bytes()).map_err(|e| self.io(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io(e))?;
        tmp.persist(&self.path).map_err(|e| self.io(e.error))?;
        debug!(path = %self.path.display(), "initialized index record");
        Ok(())
    }

    /// Appends `ids` without touching existing lines. Returns how many ids were
    /// written. Appending an id twice leaves a duplicate line, which `load`
    /// collapses.
    pub fn append<'a, I>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a DocumentId>,
    {
        let mut written = 0usize;
        let mut body = String::new();
        for id in ids {
            body.push_str(id.as_str());
            body.push('\n');
            written += 1;
        }
        if written == 0 {
            return Ok(0);
        }
        if self.missing_trailing_newline()? {
            body.insert(0, '\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        file.write_all(body.as_bytes()).map_err(|e| self.io(e))?;
        file.sync_data().map_err(|e| self.io(e))?;
        debug!(path = %self.path.display(), appended = written, "appended to index record");
        Ok(written)
    }

    fn missing_trailing_newline(&self) -> Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(self.io(e)),
        };
        let len = file.metadata().map_err(|e| self.io(e))?.len();
        if len == 0 {
            return Ok(false);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).map_err(|e| self.io(e))?;
        file.read_exact(&mut last).map_err(|e| self.io(e))?;
        Ok(last[0] != b'\n')
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::RecordStoreCorrupt { path: self.path.clone(), reason }
    }

    fn io(&self, source: std::io::Error) -> Error {
        Error::RecordStoreIo { path: self.path.clone(), source }
    }
}

fn render<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a DocumentId>,
{
    ids.into_iter().fold(String::new(), |mut out, id| {
        out.push_str(id.as_str());
        out.push('\n');
        out
    })
}
